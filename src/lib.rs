//! SparCC: Sparse Correlations for Compositional data
//!
//! This library estimates correlations between the unobserved absolute
//! abundances behind compositional count data (e.g. microbiome OTU tables),
//! and assesses them with permutation-based pseudo p-values.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (CountMatrix, ComponentMatrix)
//! - **normalize**: Fraction estimation and the CLR baseline
//! - **basis**: Log-ratio variation, basis variances, exclusion refinement
//! - **pipeline**: Iterated estimation with median aggregation
//! - **test**: Permutation pseudo p-values
//!
//! # Example
//!
//! ```no_run
//! use sparcc::prelude::*;
//!
//! let counts = CountMatrix::from_tsv("counts.tsv").unwrap();
//!
//! let config = SparccConfig {
//!     n_iter: 20,
//!     seed: Some(42),
//!     ..Default::default()
//! };
//! let result = run_iterations(&counts, &config).unwrap();
//! result.correlation.to_tsv("correlation.tsv").unwrap();
//!
//! let p_values = permutation_pvalues(
//!     &counts,
//!     result.correlation.matrix(),
//!     &config,
//!     &PermutationConfig::default(),
//! )
//! .unwrap();
//! ```

pub mod basis;
pub mod data;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::basis::{
        estimate_basis_correlation, estimate_basis_correlation_with, BasisCorrelation,
        BasisEstimate, BasisMethod, BasisOptions, FallbackReason,
    };
    pub use crate::data::{ComponentMatrix, CountMatrix};
    pub use crate::error::{Result, SparccError};
    pub use crate::normalize::{clr, clr_correlation, estimate_fractions, Centrality, FractionMethod};
    pub use crate::pipeline::{run_iterations, RunConfig, RunSummary, SparccConfig, SparccResult};
    pub use crate::test::{
        compute_pvalues, compute_pvalues_parallel, permutation_pvalues, permute_counts,
        permuted_correlations_from_template, PermutationConfig, TestType,
    };
}
