//! Iterated estimation, median aggregation and end-to-end run configuration.

mod run_config;
mod runner;
pub mod spill;

pub use run_config::RunConfig;
pub use runner::{
    median_aggregate, nan_median, run_iterations, run_iterations_dense, RunSummary, SparccConfig,
    SparccResult,
};
pub use spill::SpillStore;
