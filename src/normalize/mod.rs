//! Fraction estimation and log-ratio transforms for compositional data.
//!
//! - **fractions**: counts to component fractions (normalize, pseudo, Dirichlet)
//! - **CLR**: centered log-ratio transform and the CLR correlation baseline

pub mod clr;
pub mod fractions;

pub use clr::{clr, clr_correlation, Centrality};
pub use fractions::{estimate_fractions, normalize_rows, FractionMethod, DEFAULT_PSEUDO_COUNT};
