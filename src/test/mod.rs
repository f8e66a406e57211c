//! Significance of basis correlations by permutation.


pub use permute::{permutation_pvalues, permute_counts, PermutationConfig};
pub use pvalues::{
    compute_pvalues, compute_pvalues_parallel, permuted_correlations_from_template, TestType,
};
