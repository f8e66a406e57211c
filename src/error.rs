//! Error types for the sparcc library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum SparccError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value '{value}' at row {row}, column {col}")]
    InvalidValue {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Can not detect correlations between compositions of <4 components ({found} given)")]
    InsufficientComponents { found: usize },

    #[error("Division by zero: {0}")]
    Division(String),

    #[error("Log-ratio domain error: {0}")]
    Domain(String),

    #[error("Singular linear system: {0}")]
    SingularMatrix(String),

    #[error("Unsupported test type '{0}' (expected 'two_sided' or 'one_sided')")]
    UnsupportedTestType(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, SparccError>;

/// Fail with `DimensionMismatch` unless `actual == expected`.
pub fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(SparccError::DimensionMismatch { expected, actual })
    }
}
