//! Error types for beacon-daemon.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("discovery error: {0}")]
    Discovery(#[from] beacon_discovery::DiscoveryError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] beacon_orchestrator::OrchestratorError),

    #[error("registry error: {0}")]
    Registry(#[from] beacon_registry::RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        DaemonError::Config(e.to_string())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
