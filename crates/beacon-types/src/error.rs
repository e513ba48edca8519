//! Errors for parsing core types

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("Unknown service source: {0}")]
    UnknownSource(String),

    #[error("Unknown health status: {0}")]
    UnknownHealthStatus(String),

    #[error("Duplicate source in priority list: {0}")]
    DuplicatePriority(String),
}
