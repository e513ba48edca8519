//! Bare TCP connect probe.

use async_trait::async_trait;
use beacon_types::{HealthCheckResult, ProbeDescriptor, ProbeKind};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use super::HealthProbe;
use crate::config::ProbeConfig;
use crate::retry::{run_attempts, AttemptOutcome};

/// Connects and immediately closes; refused or unresolvable is unhealthy.
pub struct TcpProbe {
    config: ProbeConfig,
}

impl TcpProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn attempt(host: &str, port: u16) -> AttemptOutcome {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                drop(stream);
                AttemptOutcome::Healthy(format!("connected to {}:{}", host, port))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => AttemptOutcome::TimedOut,
            Err(e) => AttemptOutcome::Unhealthy(format!("connect to {}:{} failed: {}", host, port, e)),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Tcp
    }

    #[instrument(skip(self, descriptor))]
    async fn check(&self, descriptor: &ProbeDescriptor) -> HealthCheckResult {
        let (Some(host), Some(port)) = (descriptor.host.as_deref(), descriptor.port) else {
            return HealthCheckResult::unknown(ProbeKind::Tcp, "no host:port to connect to");
        };

        debug!(host = %host, port, "Executing TCP probe");
        run_attempts(&self.config, ProbeKind::Tcp, |_| Self::attempt(host, port)).await
    }
}
