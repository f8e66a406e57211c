//! Log-ratio variation matrix of a fraction table.

use crate::error::{Result, SparccError};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Compute the variation matrix of a samples × components fraction matrix.
///
/// Element (i, j) is the unbiased sample variance of `ln(x_i / x_j)` over
/// the samples. The result is symmetric with a zero diagonal. The upper
/// triangle is computed row-parallel; each log column is computed once.
///
/// # Errors
/// `Domain` when a fraction is zero, negative or not finite.
pub fn variation_matrix(fractions: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (n_samples, n_components) = fractions.shape();
    if n_samples == 0 || n_components == 0 {
        return Err(SparccError::EmptyData(
            "Cannot compute variation of an empty matrix".to_string(),
        ));
    }

    for j in 0..n_components {
        for i in 0..n_samples {
            let val = fractions[(i, j)];
            if !(val > 0.0) || !val.is_finite() {
                return Err(SparccError::Domain(format!(
                    "Log-ratio requires positive fractions; found {} at sample {}, component {}",
                    val, i, j
                )));
            }
        }
    }

    // Column-major storage keeps each component's log values contiguous
    let logs = fractions.map(|x| x.ln());

    let upper: Vec<Vec<f64>> = (0..n_components)
        .into_par_iter()
        .map(|i| {
            let li = logs.column(i);
            ((i + 1)..n_components)
                .map(|j| {
                    let lj = logs.column(j);
                    log_ratio_variance(li.iter().zip(lj.iter()).map(|(a, b)| a - b), n_samples)
                })
                .collect()
        })
        .collect();

    let mut variation = DMatrix::zeros(n_components, n_components);
    for (i, row) in upper.iter().enumerate() {
        for (offset, &v) in row.iter().enumerate() {
            let j = i + 1 + offset;
            variation[(i, j)] = v;
            variation[(j, i)] = v;
        }
    }
    Ok(variation)
}

/// Unbiased variance of a stream of log ratios.
///
/// Values are shifted by the first ratio before accumulating, so a constant
/// ratio gives exactly zero.
fn log_ratio_variance(ratios: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n < 2 {
        return 0.0;
    }
    let mut shift = None;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for r in ratios {
        let s = *shift.get_or_insert(r);
        let d = r - s;
        sum += d;
        sum_sq += d * d;
    }
    let n = n as f64;
    ((sum_sq - sum * sum / n) / (n - 1.0)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_fractions_have_zero_variation() {
        let fractions = DMatrix::from_element(50, 50, 0.02);
        let v = variation_matrix(&fractions).unwrap();
        assert_eq!(v.sum(), 0.0);
    }

    #[test]
    fn test_symmetric_with_zero_diagonal() {
        let fractions = DMatrix::from_fn(6, 5, |i, j| 1.0 + ((i * 7 + j * 3) % 5) as f64);
        let v = variation_matrix(&fractions).unwrap();
        for i in 0..5 {
            assert_eq!(v[(i, i)], 0.0);
            for j in 0..5 {
                assert_eq!(v[(i, j)], v[(j, i)]);
                assert!(v[(i, j)] >= 0.0);
            }
        }
    }

    #[test]
    fn test_unbiased_variance() {
        // ln(x0/x1) over samples = ln(1), ln(e), ln(e^2) = 0, 1, 2 -> var = 1
        let e = std::f64::consts::E;
        let fractions = DMatrix::from_row_slice(
            3,
            2,
            &[1.0, 1.0, e, 1.0, e * e, 1.0],
        );
        let v = variation_matrix(&fractions).unwrap();
        assert_relative_eq!(v[(0, 1)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_non_positive_fraction() {
        let fractions = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.0, 1.0]);
        assert!(matches!(
            variation_matrix(&fractions),
            Err(SparccError::Domain(_))
        ));
    }
}
