//! Discovery statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    /// Observations returned in the last pass.
    pub services: usize,
    /// Passes in which the source failed.
    pub errors: u64,
    pub last_duration_ms: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub total_passes: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_pass_duration_ms: u64,
    pub services_in_last_pass: usize,
    pub per_source: BTreeMap<String, SourceStats>,
    /// Cumulative isolated failures: sources, metadata extraction, registration.
    pub error_count: u64,
    pub created: u64,
    pub updated: u64,
    pub duplicates: u64,
    pub validation_failures: u64,
    /// Health status counts from the last pass; unprobed records count as "unchecked".
    pub health: BTreeMap<String, usize>,
    pub change_events: u64,
    pub continuous_running: bool,
}
