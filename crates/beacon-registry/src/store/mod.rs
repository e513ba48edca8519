//! Durable mirrors of the registry.
//!
//! The registry owns the authoritative in-memory state; a [`ServiceStore`]
//! receives every mutation after it has been applied in memory.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use beacon_types::ServiceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Kind of mutation recorded in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Updated,
    StatusUpdated,
    HealthUpdated,
    Deregistered,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::StatusUpdated => "status_updated",
            HistoryAction::HealthUpdated => "health_updated",
            HistoryAction::Deregistered => "deregistered",
        }
    }
}

impl std::str::FromStr for HistoryAction {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(HistoryAction::Created),
            "updated" => Ok(HistoryAction::Updated),
            "status_updated" => Ok(HistoryAction::StatusUpdated),
            "health_updated" => Ok(HistoryAction::HealthUpdated),
            "deregistered" => Ok(HistoryAction::Deregistered),
            other => Err(StorageError::InvalidData(format!(
                "unknown history action: {}",
                other
            ))),
        }
    }
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub service_id: String,
    pub action: HistoryAction,
    pub timestamp: DateTime<Utc>,
    pub changes: Value,
}

impl HistoryEntry {
    pub fn new(service_id: impl Into<String>, action: HistoryAction, changes: Value) -> Self {
        Self {
            service_id: service_id.into(),
            action,
            timestamp: Utc::now(),
            changes,
        }
    }
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Short backend name for logs and stats.
    fn backend(&self) -> &'static str;

    async fn load_all(&self) -> StorageResult<Vec<ServiceRecord>>;

    /// Insert or replace a record by id.
    async fn upsert(&self, record: &ServiceRecord) -> StorageResult<()>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: &str) -> StorageResult<bool>;

    async fn append_history(&self, entry: &HistoryEntry) -> StorageResult<()>;

    /// Most recent entries first.
    async fn history(&self, service_id: &str, limit: usize) -> StorageResult<Vec<HistoryEntry>>;
}
