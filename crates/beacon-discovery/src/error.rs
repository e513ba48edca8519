//! Error types for beacon-discovery crate.

use thiserror::Error;

/// Errors from discovery sources and registry adapters.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Runtime or catalog API unreachable; the pass continues without it.
    #[error("discovery source '{name}' unavailable: {reason}")]
    SourceUnavailable { name: String, reason: String },

    /// Adapter does not support the operation.
    #[error("'{adapter}' does not support {operation}")]
    Unsupported { adapter: String, operation: String },

    /// Adapter operation attempted before a successful connect.
    #[error("adapter '{0}' is not connected")]
    NotConnected(String),

    /// HTTP request failed or returned an error status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Payload could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid source configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    pub fn unavailable(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(adapter: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            adapter: adapter.into(),
            operation: operation.into(),
        }
    }
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        DiscoveryError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(e: serde_json::Error) -> Self {
        DiscoveryError::Parse(e.to_string())
    }
}

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
