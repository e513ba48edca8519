//! Health probes.
//!
//! Every probe takes a [`ProbeDescriptor`] and always yields a
//! [`HealthCheckResult`]; failures become statuses, never errors.

mod composite;
mod http;
mod process;
mod script;
mod tcp;

pub use composite::{AggregationPolicy, CompositeProbe};
pub use http::HttpProbe;
pub use process::ProcessProbe;
pub use script::ScriptProbe;
pub use tcp::TcpProbe;

use async_trait::async_trait;
use beacon_types::{HealthCheckResult, ProbeDescriptor, ProbeKind};

/// Trait for health probes.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Get the probe kind.
    fn kind(&self) -> ProbeKind;

    /// Check the target described by `descriptor`.
    async fn check(&self, descriptor: &ProbeDescriptor) -> HealthCheckResult;

    /// Get the probe name for logging.
    fn name(&self) -> String {
        self.kind().to_string()
    }
}
