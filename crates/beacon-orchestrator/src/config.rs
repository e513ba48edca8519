//! Orchestrator configuration.

use std::time::Duration;

use beacon_types::SourcePriority;
use serde::{Deserialize, Serialize};

/// Stage switches, timing, and merge precedence for discovery passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_true")]
    pub validate: bool,

    #[serde(default = "default_true")]
    pub check_health: bool,

    #[serde(default = "default_true")]
    pub extract_metadata: bool,

    /// Write unified records to the registry, when one is attached.
    #[serde(default = "default_true")]
    pub register: bool,

    /// Seconds between continuous passes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// How long `stop_continuous_discovery` waits before aborting the loop.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Upper bound on one source's `discover` call.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Run stale-record cleanup after every continuous pass.
    #[serde(default = "default_true")]
    pub cleanup_each_pass: bool,

    /// Source names, highest precedence first.
    #[serde(default = "default_source_priority")]
    pub source_priority: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            validate: true,
            check_health: true,
            extract_metadata: true,
            register: true,
            interval_secs: default_interval_secs(),
            stop_grace_ms: default_stop_grace_ms(),
            source_timeout_ms: default_source_timeout_ms(),
            cleanup_each_pass: true,
            source_priority: default_source_priority(),
        }
    }
}

impl OrchestratorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_stop_grace_ms() -> u64 {
    10_000
}

fn default_source_timeout_ms() -> u64 {
    120_000
}

fn default_source_priority() -> Vec<String> {
    SourcePriority::default()
        .order()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

/// Per-call overrides of the configured stage switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Only run sources with these names; all when unset.
    pub sources: Option<Vec<String>>,
    pub validate: Option<bool>,
    pub check_health: Option<bool>,
    pub extract_metadata: Option<bool>,
    pub register: Option<bool>,
}

impl DiscoveryOptions {
    /// Discovery and unification only.
    pub fn discover_only() -> Self {
        Self {
            validate: Some(false),
            check_health: Some(false),
            extract_metadata: Some(false),
            register: Some(false),
            ..Default::default()
        }
    }

    pub(crate) fn resolve(&self, config: &OrchestratorConfig) -> Stages {
        Stages {
            validate: self.validate.unwrap_or(config.validate),
            check_health: self.check_health.unwrap_or(config.check_health),
            extract_metadata: self.extract_metadata.unwrap_or(config.extract_metadata),
            register: self.register.unwrap_or(config.register),
        }
    }

    pub(crate) fn includes(&self, source_name: &str) -> bool {
        self.sources
            .as_ref()
            .map_or(true, |names| names.iter().any(|n| n == source_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stages {
    pub validate: bool,
    pub check_health: bool,
    pub extract_metadata: bool,
    pub register: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(300));
        assert_eq!(config.stop_grace(), Duration::from_secs(10));
        assert_eq!(config.source_priority[0], "docker");
        assert_eq!(config.source_priority.last().map(String::as_str), Some("local"));
    }

    #[test]
    fn test_options_override_config() {
        let config = OrchestratorConfig::default();
        let stages = DiscoveryOptions::discover_only().resolve(&config);
        assert!(!stages.validate && !stages.check_health && !stages.register);

        let defaults = DiscoveryOptions::default().resolve(&config);
        assert!(defaults.validate && defaults.register);
    }

    #[test]
    fn test_source_selection() {
        let options = DiscoveryOptions {
            sources: Some(vec!["local".into()]),
            ..Default::default()
        };
        assert!(options.includes("local"));
        assert!(!options.includes("docker"));
        assert!(DiscoveryOptions::default().includes("docker"));
    }
}
