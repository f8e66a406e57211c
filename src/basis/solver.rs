//! Basis variance estimation from the variation matrix.

use crate::error::{Result, SparccError};
use nalgebra::{DMatrix, DVector};

/// Floor for inferred basis variances.
pub const DEFAULT_MIN_VARIANCE: f64 = 1e-4;

/// Initial linear system matrix: all ones plus (k - 2) on the diagonal.
///
/// With t_i the row sums of the variation matrix, `M * omega = t` relates
/// the log-ratio variances to the basis variances `omega` under the
/// assumption that basis correlations are sparse.
pub fn default_system_matrix(k: usize) -> DMatrix<f64> {
    let diagonal = k as f64 - 2.0;
    DMatrix::from_fn(k, k, |i, j| if i == j { 1.0 + diagonal } else { 1.0 })
}

/// Estimate basis variances by solving `M * omega = rowsums(V)`.
///
/// Variances at or below zero are clamped to `v_min`.
///
/// # Errors
/// `SingularMatrix` when `M` is not invertible or the solution is not finite.
pub fn basis_variances(
    variation: &DMatrix<f64>,
    system: &DMatrix<f64>,
    v_min: f64,
) -> Result<DVector<f64>> {
    if system.nrows() != variation.nrows() || !system.is_square() {
        return Err(SparccError::DimensionMismatch {
            expected: variation.nrows(),
            actual: system.nrows(),
        });
    }

    let row_sums = variation.column_sum();
    let solution = system
        .clone()
        .lu()
        .solve(&row_sums)
        .ok_or_else(|| SparccError::SingularMatrix("basis variance system".to_string()))?;

    if solution.iter().any(|v| !v.is_finite()) {
        return Err(SparccError::SingularMatrix(
            "basis variance solution is not finite".to_string(),
        ));
    }

    Ok(solution.map(|v| if v <= 0.0 { v_min } else { v }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_system_matrix() {
        let m = default_system_matrix(5);
        assert_eq!(m[(0, 0)], 4.0);
        assert_eq!(m[(0, 1)], 1.0);
        assert_eq!(m[(4, 3)], 1.0);
    }

    #[test]
    fn test_uniform_variation() {
        let v = DMatrix::from_element(50, 50, 1.0);
        let m = default_system_matrix(50);
        let bv = basis_variances(&v, &m, DEFAULT_MIN_VARIANCE).unwrap();
        // 50 / (48 + 50)
        for &b in bv.iter() {
            assert_relative_eq!(b, 0.510_204_08, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_solution_satisfies_system() {
        let k = 6;
        let v = DMatrix::from_fn(k, k, |i, j| {
            if i == j {
                0.0
            } else {
                1.0 + ((i + j) % 3) as f64 * 0.25
            }
        });
        let m = default_system_matrix(k);
        let bv = basis_variances(&v, &m, 0.0).unwrap();
        let reproduced = &m * &bv;
        let row_sums = v.column_sum();
        for i in 0..k {
            assert_relative_eq!(reproduced[i], row_sums[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_clamps_non_positive() {
        let v = DMatrix::zeros(4, 4);
        let bv = basis_variances(&v, &default_system_matrix(4), 1e-4).unwrap();
        assert!(bv.iter().all(|&b| b == 1e-4));
    }

    #[test]
    fn test_singular_system() {
        let v = DMatrix::from_element(4, 4, 1.0);
        let m = DMatrix::from_element(4, 4, 1.0);
        assert!(matches!(
            basis_variances(&v, &m, 1e-4),
            Err(SparccError::SingularMatrix(_))
        ));
    }
}
