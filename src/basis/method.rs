//! Basis correlation method selection (SparCC with CLR fallback).

use super::exclusion::{refine, RefinementOutcome};
use super::solver::DEFAULT_MIN_VARIANCE;
use super::variation::variation_matrix;
use crate::error::{Result, SparccError};
use crate::normalize::clr::{clr_correlation, Centrality};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Tolerance above 1 for SparCC correlation magnitudes before falling back.
pub const CORRELATION_TOLERANCE: f64 = 1e-3;

/// Algorithm used to compute basis correlations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasisMethod {
    /// Iterative SparCC estimation.
    #[default]
    Sparcc,
    /// Pearson correlation of CLR-transformed fractions.
    Clr,
}

impl fmt::Display for BasisMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasisMethod::Sparcc => f.write_str("sparcc"),
            BasisMethod::Clr => f.write_str("clr"),
        }
    }
}

impl FromStr for BasisMethod {
    type Err = SparccError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sparcc" => Ok(BasisMethod::Sparcc),
            "clr" => Ok(BasisMethod::Clr),
            other => Err(SparccError::InvalidParameter(format!(
                "Unsupported basis correlation method: \"{}\"",
                other
            ))),
        }
    }
}

/// Options for a single basis correlation estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasisOptions {
    /// Estimation algorithm.
    pub method: BasisMethod,
    /// Exclusion threshold, strictly between 0 and 1.
    pub threshold: f64,
    /// Maximum number of exclusion rounds.
    pub exclusion_iters: usize,
    /// Floor for basis variances.
    pub min_variance: f64,
    /// Centering used by the CLR estimate.
    pub centrality: Centrality,
}

impl Default for BasisOptions {
    fn default() -> Self {
        Self {
            method: BasisMethod::Sparcc,
            threshold: 0.1,
            exclusion_iters: 10,
            min_variance: DEFAULT_MIN_VARIANCE,
            centrality: Centrality::Mean,
        }
    }
}

impl BasisOptions {
    /// Validate parameters before any computation.
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(SparccError::InvalidParameter(format!(
                "Exclusion threshold must be between 0 and 1, got {}",
                self.threshold
            )));
        }
        if !(self.min_variance > 0.0) {
            return Err(SparccError::InvalidParameter(
                "Minimum basis variance must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Basis correlation and covariance matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisCorrelation {
    /// k × k correlation matrix.
    pub correlation: DMatrix<f64>,
    /// k × k covariance matrix.
    pub covariance: DMatrix<f64>,
}

/// Why a SparCC estimate was replaced by the CLR estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallbackReason {
    /// The exclusion loop removed too many components.
    TooManyExclusions,
    /// Some correlation magnitude exceeded 1 + tolerance.
    CorrelationRange { max_abs: f64 },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::TooManyExclusions => f.write_str("too many components excluded"),
            FallbackReason::CorrelationRange { max_abs } => {
                write!(f, "sparsity assumption violated (max |corr| = {:.4})", max_abs)
            }
        }
    }
}

/// A basis correlation estimate, tagged with whether it fell back to CLR.
#[derive(Debug, Clone, PartialEq)]
pub enum BasisEstimate {
    /// The requested method produced the result.
    Converged(BasisCorrelation),
    /// SparCC was abandoned and the CLR estimate substituted.
    FellBackToClr {
        result: BasisCorrelation,
        reason: FallbackReason,
    },
}

impl BasisEstimate {
    /// The estimate, regardless of how it was produced.
    pub fn result(&self) -> &BasisCorrelation {
        match self {
            BasisEstimate::Converged(result) => result,
            BasisEstimate::FellBackToClr { result, .. } => result,
        }
    }

    /// Consume and return the estimate.
    pub fn into_result(self) -> BasisCorrelation {
        match self {
            BasisEstimate::Converged(result) => result,
            BasisEstimate::FellBackToClr { result, .. } => result,
        }
    }

    /// Whether the CLR estimate was substituted.
    pub fn fell_back(&self) -> bool {
        matches!(self, BasisEstimate::FellBackToClr { .. })
    }
}

/// Compute the basis correlations between all components of a fraction matrix.
///
/// # Arguments
/// * `fractions` - Samples × components relative abundances
/// * `method` - SparCC (default) or CLR
/// * `threshold` - Exclusion threshold for SparCC, 0 < threshold < 1
/// * `exclusion_iters` - Number of exclusion rounds for SparCC
///
/// # Errors
/// `InvalidParameter` for a threshold outside (0, 1) and
/// `InsufficientComponents` for fewer than 4 components, both before any
/// computation; `Domain` for non-positive fractions.
pub fn estimate_basis_correlation(
    fractions: &DMatrix<f64>,
    method: BasisMethod,
    threshold: f64,
    exclusion_iters: usize,
) -> Result<BasisEstimate> {
    let options = BasisOptions {
        method,
        threshold,
        exclusion_iters,
        ..Default::default()
    };
    estimate_basis_correlation_with(fractions, &options)
}

/// Like [`estimate_basis_correlation`], with every option explicit.
pub fn estimate_basis_correlation_with(
    fractions: &DMatrix<f64>,
    options: &BasisOptions,
) -> Result<BasisEstimate> {
    options.validate()?;

    let k = fractions.ncols();
    if k < 4 {
        return Err(SparccError::InsufficientComponents { found: k });
    }

    match options.method {
        BasisMethod::Clr => Ok(BasisEstimate::Converged(run_clr(fractions, options)?)),
        BasisMethod::Sparcc => run_sparcc(fractions, options),
    }
}

fn run_sparcc(fractions: &DMatrix<f64>, options: &BasisOptions) -> Result<BasisEstimate> {
    let variation = variation_matrix(fractions)?;

    let refined = match refine(
        &variation,
        options.threshold,
        options.exclusion_iters,
        options.min_variance,
    )? {
        RefinementOutcome::Converged(refined) => refined,
        RefinementOutcome::TooManyExclusions { .. } => {
            return fall_back(fractions, options, FallbackReason::TooManyExclusions);
        }
    };

    let max_abs = max_abs_ignoring_nan(&refined.correlation);
    if max_abs > 1.0 + CORRELATION_TOLERANCE {
        return fall_back(fractions, options, FallbackReason::CorrelationRange { max_abs });
    }

    Ok(BasisEstimate::Converged(BasisCorrelation {
        correlation: refined.correlation,
        covariance: refined.covariance,
    }))
}

fn fall_back(
    fractions: &DMatrix<f64>,
    options: &BasisOptions,
    reason: FallbackReason,
) -> Result<BasisEstimate> {
    warn!(%reason, "returning clr result");
    Ok(BasisEstimate::FellBackToClr {
        result: run_clr(fractions, options)?,
        reason,
    })
}

fn run_clr(fractions: &DMatrix<f64>, options: &BasisOptions) -> Result<BasisCorrelation> {
    let (correlation, covariance) = clr_correlation(fractions, options.centrality)?;
    Ok(BasisCorrelation {
        correlation,
        covariance,
    })
}

fn max_abs_ignoring_nan(matrix: &DMatrix<f64>) -> f64 {
    matrix
        .iter()
        .filter(|v| !v.is_nan())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
}
