//! Error types for beacon-health crate.
//!
//! Probe failures are reported as health statuses, never as errors. These
//! errors cover probe construction only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    /// HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// Descriptor does not carry what the probe needs.
    #[error("invalid probe target: {0}")]
    InvalidTarget(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;
