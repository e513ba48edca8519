//! Health probe configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-probe timing and transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout for one attempt, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total number of attempts.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Verify TLS certificates on HTTPS probes.
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Follow HTTP redirects.
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            verify_ssl: true,
            follow_redirects: true,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Number of attempts; at least one.
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Upper bound on a full retry loop: `timeout × attempts + delay × (attempts − 1)`.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.attempts();
        self.timeout() * attempts + self.retry_delay() * (attempts - 1)
    }
}

/// Settings for batch health checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Maximum probes in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    10
}
