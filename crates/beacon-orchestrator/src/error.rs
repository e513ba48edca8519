//! Error types for beacon-orchestrator crate.

use thiserror::Error;

/// Errors from building or driving the orchestrator. Failures inside a pass
/// are counted in the statistics instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Continuous discovery is already running")]
    AlreadyRunning,

    #[error("Discovery interval must be greater than zero")]
    InvalidInterval,

    #[error("Validator error: {0}")]
    Validator(#[from] beacon_validator::ValidatorError),

    #[error("Registry error: {0}")]
    Registry(#[from] beacon_registry::RegistryError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
