//! Registry statistics and bulk update payloads.

use std::collections::HashMap;

use beacon_types::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub by_type: HashMap<String, usize>,
    pub by_status: HashMap<String, usize>,
    pub by_source: HashMap<String, usize>,
    pub by_health: HashMap<String, usize>,
    pub validated: usize,
    pub invalid: usize,
    pub oldest_last_seen: Option<DateTime<Utc>>,
    pub newest_last_seen: Option<DateTime<Utc>>,
    /// Mutations not yet mirrored to the durable store.
    pub pending_writes: usize,
    pub backend: String,
}

/// Partial update applied to one record by [`crate::ServiceRegistry::bulk_update`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdate {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub add_tags: Vec<String>,
    #[serde(default)]
    pub remove_tags: Vec<String>,
    /// Deep-merged into the record's metadata.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}
