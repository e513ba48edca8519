//! Error types for beacon-validator crate.
//!
//! Validation findings are reported in a `ValidationResult`; these errors
//! cover validator construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidatorError {
    /// A configured sensitive-value pattern does not compile.
    #[error("invalid sensitive pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for validator operations.
pub type ValidatorResult<T> = Result<T, ValidatorError>;
