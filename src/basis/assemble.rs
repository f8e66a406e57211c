//! Basis covariance and correlation from basis variances.

use nalgebra::{DMatrix, DVector};

/// Given basis variances and the observed variation matrix, compute the
/// basis correlation and covariance matrices.
///
/// Cov[i,j] = (omega_i + omega_j - V[i,j]) / 2 and
/// Corr[i,j] = Cov[i,j] / sqrt(omega_i * omega_j).
pub fn correlation_from_variances(
    variation: &DMatrix<f64>,
    basis_variances: &DVector<f64>,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let k = basis_variances.len();
    let covariance = DMatrix::from_fn(k, k, |i, j| {
        0.5 * (basis_variances[i] + basis_variances[j] - variation[(i, j)])
    });
    let correlation = DMatrix::from_fn(k, k, |i, j| {
        covariance[(i, j)] / (basis_variances[i] * basis_variances[j]).sqrt()
    });
    (correlation, covariance)
}
