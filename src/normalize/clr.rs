//! Centered Log-Ratio (CLR) transformation and the CLR correlation baseline.

use crate::error::{Result, SparccError};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Central tendency subtracted from each sample's log values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Centrality {
    /// Arithmetic mean of the logs (log of the geometric mean).
    #[default]
    Mean,
    /// Median of the logs.
    Median,
}

/// Apply the CLR transformation to a samples × components fraction matrix.
///
/// # Formula
/// For sample i: CLR(x_ij) = log(x_ij) - center(log(x_i))
///
/// # Note
/// Input must be strictly positive (fractions, or counts with pseudocounts).
pub fn clr(fractions: &DMatrix<f64>, centrality: Centrality) -> Result<DMatrix<f64>> {
    let (n_samples, n_components) = fractions.shape();

    if n_samples == 0 || n_components == 0 {
        return Err(SparccError::EmptyData(
            "Cannot apply CLR to empty matrix".to_string(),
        ));
    }

    for i in 0..n_samples {
        for j in 0..n_components {
            let val = fractions[(i, j)];
            if !(val > 0.0) {
                return Err(SparccError::Domain(format!(
                    "CLR requires positive values; found {} at ({}, {})",
                    val, i, j
                )));
            }
        }
    }

    let log_data: DMatrix<f64> = fractions.map(|x| x.ln());

    let centers: Vec<f64> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let row: Vec<f64> = log_data.row(i).iter().copied().collect();
            match centrality {
                Centrality::Mean => row.iter().sum::<f64>() / n_components as f64,
                Centrality::Median => median(row),
            }
        })
        .collect();

    Ok(DMatrix::from_fn(n_samples, n_components, |i, j| {
        log_data[(i, j)] - centers[i]
    }))
}

/// CLR correlation and covariance of a fraction matrix.
///
/// The fractions are CLR transformed and the Pearson correlation and the
/// unbiased covariance between components (columns) are returned. Components
/// with zero variance get `NaN` correlations.
pub fn clr_correlation(
    fractions: &DMatrix<f64>,
    centrality: Centrality,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let z = clr(fractions, centrality)?;
    let n_samples = z.nrows();
    if n_samples < 2 {
        return Err(SparccError::InvalidParameter(
            "CLR covariance requires at least 2 samples".to_string(),
        ));
    }

    let covariance = column_covariance(&z);
    let k = covariance.nrows();
    let correlation = DMatrix::from_fn(k, k, |i, j| {
        covariance[(i, j)] / (covariance[(i, i)] * covariance[(j, j)]).sqrt()
    });

    Ok((correlation, covariance))
}

/// Unbiased covariance between the columns of `data`.
///
/// Columns are shifted by their first value before centering, so constant
/// columns give exactly zero variance.
fn column_covariance(data: &DMatrix<f64>) -> DMatrix<f64> {
    let n = data.nrows();
    let first = data.row(0).clone_owned();
    let mut centered = data.clone();
    for mut row in centered.row_iter_mut() {
        row -= &first;
    }
    let means = centered.row_mean();
    for mut row in centered.row_iter_mut() {
        row -= &means;
    }
    (centered.transpose() * &centered) / (n as f64 - 1.0)
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clr_rows_sum_zero() {
        let fractions = DMatrix::from_row_slice(
            2,
            4,
            &[0.1, 0.2, 0.3, 0.4, 0.25, 0.25, 0.4, 0.1],
        );
        let z = clr(&fractions, Centrality::Mean).unwrap();
        for i in 0..2 {
            assert_relative_eq!(z.row(i).sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_clr_manual_calculation() {
        let fractions = DMatrix::from_row_slice(1, 2, &[0.2, 0.8]);
        let z = clr(&fractions, Centrality::Mean).unwrap();
        // geometric mean = 0.4
        assert_relative_eq!(z[(0, 0)], (0.5_f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(z[(0, 1)], (2.0_f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_clr_median_centering() {
        let fractions = DMatrix::from_row_slice(1, 3, &[0.1, 0.3, 0.6]);
        let z = clr(&fractions, Centrality::Median).unwrap();
        assert_relative_eq!(z[(0, 1)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(z[(0, 2)], 2.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_clr_rejects_zero() {
        let fractions = DMatrix::from_row_slice(1, 2, &[0.0, 1.0]);
        assert!(matches!(
            clr(&fractions, Centrality::Mean),
            Err(SparccError::Domain(_))
        ));
    }

    #[test]
    fn test_clr_correlation_of_constant_data() {
        let fractions = DMatrix::from_element(50, 50, 0.02);
        let (corr, cov) = clr_correlation(&fractions, Centrality::Mean).unwrap();
        assert!(corr.iter().all(|c| c.is_nan()));
        assert_eq!(cov.sum(), 0.0);
    }

    #[test]
    fn test_clr_correlation_is_symmetric_with_unit_diagonal() {
        let fractions = DMatrix::from_row_slice(
            4,
            4,
            &[
                0.1, 0.2, 0.3, 0.4,
                0.4, 0.3, 0.2, 0.1,
                0.25, 0.25, 0.25, 0.25,
                0.2, 0.5, 0.2, 0.1,
            ],
        );
        let (corr, cov) = clr_correlation(&fractions, Centrality::Mean).unwrap();
        for i in 0..4 {
            assert_relative_eq!(corr[(i, i)], 1.0, epsilon = 1e-12);
            for j in 0..4 {
                assert_relative_eq!(corr[(i, j)], corr[(j, i)], epsilon = 1e-12);
                assert_relative_eq!(cov[(i, j)], cov[(j, i)], epsilon = 1e-12);
            }
        }
    }
}
