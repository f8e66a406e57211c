//! Basis correlation estimation for compositional data.
//!
//! The SparCC estimator infers correlations between the unobserved absolute
//! abundances (the basis) from log-ratio variances of the observed
//! fractions:
//!
//! 1. **variation**: pairwise log-ratio variances V
//! 2. **solver**: basis variances from `M * omega = rowsums(V)`
//! 3. **assemble**: covariances and correlations from omega and V
//! 4. **exclusion**: drop strongly correlated pairs and re-solve
//! 5. **method**: choose SparCC or CLR, validate, fall back when needed

pub mod assemble;
pub mod exclusion;
pub mod method;
pub mod solver;
pub mod variation;

pub use assemble::correlation_from_variances;
pub use exclusion::{refine, strongest_pair, PairScan, Refined, RefinementOutcome};
pub use method::{
    estimate_basis_correlation, estimate_basis_correlation_with, BasisCorrelation, BasisEstimate,
    BasisMethod, BasisOptions, FallbackReason, CORRELATION_TOLERANCE,
};
pub use solver::{basis_variances, default_system_matrix, DEFAULT_MIN_VARIANCE};
pub use variation::variation_matrix;
