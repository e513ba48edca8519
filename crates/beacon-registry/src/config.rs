//! Registry configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Backend selector value that keeps everything in process memory.
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// `sqlite://path`, `sqlite::memory:`, or `memory`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Records not seen for longer than this are removed by cleanup.
    #[serde(default = "default_max_service_age_days")]
    pub max_service_age_days: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_service_age_days: default_max_service_age_days(),
        }
    }
}

impl RegistryConfig {
    pub fn in_memory() -> Self {
        Self {
            database_url: MEMORY_DATABASE.to_string(),
            ..Default::default()
        }
    }

    pub fn max_service_age(&self) -> Duration {
        Duration::days(i64::from(self.max_service_age_days))
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }
}

fn default_database_url() -> String {
    "sqlite://beacon.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_service_age_days() -> u32 {
    7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.database_url, "sqlite://beacon.db");
        assert_eq!(config.max_service_age(), Duration::days(7));
        assert!(!config.uses_memory_store());
        assert!(RegistryConfig::in_memory().uses_memory_store());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"max_service_age_days": 1}"#).unwrap();
        assert_eq!(config.max_service_age_days, 1);
        assert_eq!(config.max_connections, 5);
    }
}
