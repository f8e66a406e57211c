//! Conversion of raw counts to component fractions.
//!
//! Three estimators are available:
//!
//! - **normalize**: divide each sample by its total (fails on empty samples)
//! - **pseudo**: add a pseudo count to every entry, then normalize
//! - **dirichlet**: draw each sample's fractions from the posterior
//!   Dirichlet(counts + pseudo count) with a uniform prior
//!
//! The Dirichlet estimator is random by construction; the iteration loop in
//! [`crate::pipeline`] exists to average that sampling noise out. The random
//! source is always passed in explicitly so callers can seed it.

use crate::error::{Result, SparccError};
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default pseudo count added by the `pseudo` and `dirichlet` estimators.
pub const DEFAULT_PSEUDO_COUNT: f64 = 1.0;

/// Method used to turn counts into fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FractionMethod {
    /// Divide each sample by its total count.
    Normalize,
    /// Add a pseudo count to every entry, then normalize.
    Pseudo,
    /// Posterior draw from Dirichlet(counts + pseudo count).
    #[default]
    Dirichlet,
}

impl FractionMethod {
    /// Whether repeated calls may return different fractions.
    pub fn is_random(self) -> bool {
        matches!(self, FractionMethod::Dirichlet)
    }
}

impl fmt::Display for FractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FractionMethod::Normalize => "normalize",
            FractionMethod::Pseudo => "pseudo",
            FractionMethod::Dirichlet => "dirichlet",
        };
        f.write_str(name)
    }
}

impl FromStr for FractionMethod {
    type Err = SparccError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normalize" | "norm" => Ok(FractionMethod::Normalize),
            "pseudo" => Ok(FractionMethod::Pseudo),
            "dirichlet" => Ok(FractionMethod::Dirichlet),
            other => Err(SparccError::InvalidParameter(format!(
                "Unsupported fraction method \"{}\"",
                other
            ))),
        }
    }
}

/// Estimate component fractions from a samples × components count matrix.
///
/// # Arguments
/// * `counts` - Non-negative counts, one row per sample
/// * `method` - Estimator to use
/// * `pseudo_count` - Added to every count by `pseudo` and `dirichlet`
/// * `rng` - Random source for the `dirichlet` draws
///
/// # Returns
/// A matrix of the same shape whose rows sum to 1.
pub fn estimate_fractions<R: Rng + ?Sized>(
    counts: &DMatrix<f64>,
    method: FractionMethod,
    pseudo_count: f64,
    rng: &mut R,
) -> Result<DMatrix<f64>> {
    let (n_samples, n_components) = counts.shape();
    if n_samples == 0 || n_components == 0 {
        return Err(SparccError::EmptyData(
            "Cannot estimate fractions of an empty matrix".to_string(),
        ));
    }
    if let Some(bad) = counts.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(SparccError::InvalidParameter(format!(
            "Counts must be finite and non-negative; found {}",
            bad
        )));
    }

    match method {
        FractionMethod::Normalize => normalize_rows(counts),
        FractionMethod::Pseudo => {
            check_pseudo_count(pseudo_count)?;
            normalize_rows(&counts.add_scalar(pseudo_count))
        }
        FractionMethod::Dirichlet => {
            check_pseudo_count(pseudo_count)?;
            dirichlet_rows(counts, pseudo_count, rng)
        }
    }
}

/// Divide each row by its sum.
pub fn normalize_rows(counts: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (n_samples, n_components) = counts.shape();

    let rows: Vec<Vec<f64>> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let total: f64 = counts.row(i).sum();
            if total == 0.0 {
                return Err(SparccError::Division(format!(
                    "Sample {} has zero total counts, cannot normalize",
                    i
                )));
            }
            Ok(counts.row(i).iter().map(|&v| v / total).collect())
        })
        .collect::<Result<_>>()?;

    Ok(DMatrix::from_fn(n_samples, n_components, |i, j| rows[i][j]))
}

fn dirichlet_rows<R: Rng + ?Sized>(
    counts: &DMatrix<f64>,
    pseudo_count: f64,
    rng: &mut R,
) -> Result<DMatrix<f64>> {
    let (n_samples, n_components) = counts.shape();
    let mut fractions = DMatrix::zeros(n_samples, n_components);

    for i in 0..n_samples {
        let mut total = 0.0;
        for j in 0..n_components {
            // Dirichlet(alpha) == Gamma(alpha_j, 1) draws scaled by their sum
            let gamma = Gamma::new(counts[(i, j)] + pseudo_count, 1.0).map_err(|e| {
                SparccError::InvalidParameter(format!("Invalid Dirichlet parameter: {}", e))
            })?;
            let draw = gamma.sample(rng);
            fractions[(i, j)] = draw;
            total += draw;
        }
        if total <= 0.0 || !total.is_finite() {
            return Err(SparccError::Division(format!(
                "Dirichlet draw for sample {} has degenerate total {}",
                i, total
            )));
        }
        fractions.row_mut(i).scale_mut(1.0 / total);
    }

    Ok(fractions)
}

fn check_pseudo_count(pseudo_count: f64) -> Result<()> {
    if pseudo_count > 0.0 && pseudo_count.is_finite() {
        Ok(())
    } else {
        Err(SparccError::InvalidParameter(
            "Pseudo count must be positive".to_string(),
        ))
    }
}
