//! Multi-iteration SparCC runner.
//!
//! Each iteration draws fresh fractions from the counts and estimates basis
//! correlations from them. The ensemble is reduced by element-wise median:
//! the final correlation is the median correlation, the final variances are
//! the median covariance diagonals, and the final covariance is rebuilt as
//! `corr[i,j] * sqrt(var_i) * sqrt(var_j)`.

use super::spill::SpillStore;
use crate::basis::{estimate_basis_correlation_with, BasisMethod, BasisOptions, DEFAULT_MIN_VARIANCE};
use crate::data::{ComponentMatrix, CountMatrix};
use crate::error::{check_dimension, Result, SparccError};
use crate::normalize::{estimate_fractions, Centrality, FractionMethod, DEFAULT_PSEUDO_COUNT};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration of a SparCC run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparccConfig {
    /// Basis correlation algorithm.
    pub method: BasisMethod,
    /// How counts are turned into fractions each iteration.
    pub normalization: FractionMethod,
    /// Number of estimation iterations to take the median over.
    pub n_iter: usize,
    /// Correlation strength exclusion threshold, 0 < threshold < 1.
    pub threshold: f64,
    /// Number of exclusion rounds per iteration.
    pub exclusion_iters: usize,
    /// Pseudo count for the `pseudo` and `dirichlet` fraction estimators.
    pub pseudo_count: f64,
    /// Floor for basis variances.
    pub min_variance: f64,
    /// Centering of the CLR estimate.
    pub centrality: Centrality,
    /// Seed for the fraction draws; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Run iterations on the rayon thread pool.
    pub parallel: bool,
    /// Write iteration matrices below this directory instead of keeping them in memory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for SparccConfig {
    fn default() -> Self {
        Self {
            method: BasisMethod::Sparcc,
            normalization: FractionMethod::Dirichlet,
            n_iter: 20,
            threshold: 0.1,
            exclusion_iters: 10,
            pseudo_count: DEFAULT_PSEUDO_COUNT,
            min_variance: DEFAULT_MIN_VARIANCE,
            centrality: Centrality::Mean,
            seed: None,
            parallel: true,
            spill_dir: None,
        }
    }
}

impl SparccConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(SparccError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(SparccError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Options for the per-iteration estimate.
    pub fn basis_options(&self) -> BasisOptions {
        BasisOptions {
            method: self.method,
            threshold: self.threshold,
            exclusion_iters: self.exclusion_iters,
            min_variance: self.min_variance,
            centrality: self.centrality,
        }
    }

    /// Validate parameters before any computation.
    pub fn validate(&self) -> Result<()> {
        if self.n_iter == 0 {
            return Err(SparccError::InvalidParameter(
                "Number of iterations must be at least 1".to_string(),
            ));
        }
        if !(self.pseudo_count > 0.0) {
            return Err(SparccError::InvalidParameter(
                "Pseudo count must be positive".to_string(),
            ));
        }
        self.basis_options().validate()
    }
}

/// Final estimate of a SparCC run.
#[derive(Debug, Clone)]
pub struct SparccResult {
    /// Median basis correlation.
    pub correlation: ComponentMatrix,
    /// Covariance rebuilt from the median correlation and median variances.
    pub covariance: ComponentMatrix,
    /// Median basis variances.
    pub variances: Vec<f64>,
    /// Number of iterations aggregated.
    pub n_iter: usize,
    /// Number of iterations that fell back to the CLR estimate.
    pub n_fallbacks: usize,
}

/// Serializable description of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub n_components: usize,
    pub n_iter: usize,
    pub n_fallbacks: usize,
    pub method: BasisMethod,
    pub normalization: FractionMethod,
    /// Number of components whose correlations are all `NaN`.
    pub n_undetermined: usize,
}

impl SparccResult {
    /// Summary of this result under `config`.
    pub fn summary(&self, config: &SparccConfig) -> RunSummary {
        let k = self.correlation.n_components();
        let n_undetermined = (0..k)
            .filter(|&i| self.correlation.data.row(i).iter().all(|c| c.is_nan()))
            .count();
        RunSummary {
            n_components: k,
            n_iter: self.n_iter,
            n_fallbacks: self.n_fallbacks,
            method: config.method,
            normalization: config.normalization,
            n_undetermined,
        }
    }
}

/// One iteration's contribution to the ensemble.
struct IterationEstimate {
    correlation: DMatrix<f64>,
    variances: DVector<f64>,
    fell_back: bool,
}

/// Run `config.n_iter` estimations on a count matrix and reduce them by median.
pub fn run_iterations(counts: &CountMatrix, config: &SparccConfig) -> Result<SparccResult> {
    run_iterations_dense(
        &counts.to_sample_major(),
        counts.component_ids().to_vec(),
        config,
    )
}

/// Like [`run_iterations`], for a dense samples × components count matrix.
pub fn run_iterations_dense(
    counts: &DMatrix<f64>,
    component_ids: Vec<String>,
    config: &SparccConfig,
) -> Result<SparccResult> {
    config.validate()?;
    let k = counts.ncols();
    if k < 4 {
        return Err(SparccError::InsufficientComponents { found: k });
    }
    check_dimension(k, component_ids.len())?;

    info!(
        samples = counts.nrows(),
        components = k,
        n_iter = config.n_iter,
        method = %config.method,
        normalization = %config.normalization,
        "starting sparcc run"
    );
    if !config.normalization.is_random() && config.n_iter > 1 {
        debug!(
            normalization = %config.normalization,
            "fractions are deterministic, every iteration gives the same estimate"
        );
    }

    let (correlations, variances, n_fallbacks) = match &config.spill_dir {
        None => {
            let estimates = collect_iterations(config, |index| {
                run_single_iteration(counts, config, index)
            })?;
            let n_fallbacks = estimates.iter().filter(|e| e.fell_back).count();
            let (correlations, variances): (Vec<_>, Vec<_>) = estimates
                .into_iter()
                .map(|e| (e.correlation, e.variances))
                .unzip();
            (correlations, variances, n_fallbacks)
        }
        Some(parent) => {
            let store = SpillStore::create_in(parent, component_ids.clone())?;
            debug!(dir = %store.path().display(), "spilling iteration matrices");
            let fell_back = collect_iterations(config, |index| {
                let estimate = run_single_iteration(counts, config, index)?;
                store.write(index, &estimate.correlation, &estimate.variances)?;
                Ok(estimate.fell_back)
            })?;
            let (correlations, variances) = store.read_all(config.n_iter)?;
            store.close()?;
            (correlations, variances, fell_back.into_iter().filter(|f| *f).count())
        }
    };

    let (correlation, variances, covariance) = median_aggregate(&correlations, &variances)?;
    info!(n_fallbacks, "sparcc run finished");

    Ok(SparccResult {
        correlation: ComponentMatrix::new(correlation, component_ids.clone())?,
        covariance: ComponentMatrix::new(covariance, component_ids)?,
        variances: variances.iter().copied().collect(),
        n_iter: config.n_iter,
        n_fallbacks,
    })
}

fn collect_iterations<T, F>(config: &SparccConfig, run: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync,
{
    if config.parallel {
        (0..config.n_iter).into_par_iter().map(&run).collect()
    } else {
        (0..config.n_iter).map(&run).collect()
    }
}

fn iteration_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
        None => StdRng::from_entropy(),
    }
}

fn run_single_iteration(
    counts: &DMatrix<f64>,
    config: &SparccConfig,
    index: usize,
) -> Result<IterationEstimate> {
    let mut rng = iteration_rng(config.seed, index);
    let fractions = estimate_fractions(counts, config.normalization, config.pseudo_count, &mut rng)?;
    let estimate = estimate_basis_correlation_with(&fractions, &config.basis_options())?;
    let fell_back = estimate.fell_back();
    debug!(iteration = index, fell_back, "iteration finished");

    let result = estimate.into_result();
    Ok(IterationEstimate {
        variances: result.covariance.diagonal(),
        correlation: result.correlation,
        fell_back,
    })
}

/// Reduce an ensemble by element-wise median, ignoring `NaN` entries.
///
/// Returns (median correlation, median variances, rebuilt covariance).
pub fn median_aggregate(
    correlations: &[DMatrix<f64>],
    variances: &[DVector<f64>],
) -> Result<(DMatrix<f64>, DVector<f64>, DMatrix<f64>)> {
    let first = correlations
        .first()
        .ok_or_else(|| SparccError::EmptyData("No iterations to aggregate".to_string()))?;
    let k = first.nrows();
    for m in correlations {
        check_dimension(k, m.nrows())?;
        check_dimension(k, m.ncols())?;
    }
    for v in variances {
        check_dimension(k, v.len())?;
    }

    let columns: Vec<Vec<f64>> = (0..k)
        .into_par_iter()
        .map(|j| {
            (0..k)
                .map(|i| nan_median(correlations.iter().map(|m| m[(i, j)])))
                .collect()
        })
        .collect();
    let correlation = DMatrix::from_fn(k, k, |i, j| columns[j][i]);

    let median_variances =
        DVector::from_fn(k, |i, _| nan_median(variances.iter().map(|v| v[i])));

    let covariance = DMatrix::from_fn(k, k, |i, j| {
        correlation[(i, j)] * median_variances[i].sqrt() * median_variances[j].sqrt()
    });

    Ok((correlation, median_variances, covariance))
}

/// Median of the non-`NaN` values; `NaN` when there are none.
pub fn nan_median(values: impl Iterator<Item = f64>) -> f64 {
    let mut kept: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.sort_by(|a, b| a.total_cmp(b));
    let n = kept.len();
    if n % 2 == 1 {
        kept[n / 2]
    } else {
        0.5 * (kept[n / 2 - 1] + kept[n / 2])
    }
}
