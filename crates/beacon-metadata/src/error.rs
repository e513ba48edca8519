//! Error types for beacon-metadata crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from a single extraction step. The extractor logs them and moves on.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File exceeds the configured read limit.
    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// File content could not be parsed.
    #[error("failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },
}

impl MetadataError {
    pub fn parse(file: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            file: file.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;
