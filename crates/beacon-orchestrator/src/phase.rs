//! Stages of one discovery pass.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    #[default]
    Idle,
    Discovering,
    Unifying,
    Validating,
    HealthChecking,
    ExtractingMetadata,
    Registering,
}

impl DiscoveryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryPhase::Idle => "idle",
            DiscoveryPhase::Discovering => "discovering",
            DiscoveryPhase::Unifying => "unifying",
            DiscoveryPhase::Validating => "validating",
            DiscoveryPhase::HealthChecking => "health_checking",
            DiscoveryPhase::ExtractingMetadata => "extracting_metadata",
            DiscoveryPhase::Registering => "registering",
        }
    }
}

impl std::fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
