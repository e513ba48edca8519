//! Bounded-concurrency batch health checking.

use std::time::Duration;

use beacon_types::{HealthCheckResult, ProbeDescriptor};
use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use crate::config::HealthConfig;
use crate::factory::ProbeFactory;

/// Slack on top of a probe's worst-case retry loop before it is abandoned.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

/// Runs probes for many targets at once.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    factory: ProbeFactory,
    max_concurrency: usize,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            factory: ProbeFactory::new(config.probe),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub fn factory(&self) -> &ProbeFactory {
        &self.factory
    }

    /// Hard per-target deadline.
    pub fn deadline(&self) -> Duration {
        self.factory.config().worst_case() + DEADLINE_SLACK
    }

    /// Check one target, bounded by [`Self::deadline`].
    pub async fn check_one(&self, descriptor: &ProbeDescriptor) -> HealthCheckResult {
        let kind = ProbeFactory::select_kind(descriptor);
        let probe = match self.factory.for_descriptor(descriptor) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Failed to build probe");
                return HealthCheckResult::unknown(kind, e.to_string());
            }
        };

        let deadline = self.deadline();
        match tokio::time::timeout(deadline, probe.check(descriptor)).await {
            Ok(result) => result,
            Err(_) => HealthCheckResult::timeout(kind, deadline),
        }
    }

    /// Check every `(key, descriptor)` pair; results keep the input order.
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn check_all(
        &self,
        targets: Vec<(String, ProbeDescriptor)>,
    ) -> Vec<(String, HealthCheckResult)> {
        let total = targets.len();
        let mut results: Vec<(usize, String, HealthCheckResult)> =
            stream::iter(targets.into_iter().enumerate())
                .map(|(index, (key, descriptor))| async move {
                    let result = self.check_one(&descriptor).await;
                    (index, key, result)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

        results.sort_by_key(|(index, _, _)| *index);

        let healthy = results.iter().filter(|(_, _, r)| r.status.is_healthy()).count();
        info!(total, healthy, "Health checks complete");

        results.into_iter().map(|(_, key, result)| (key, result)).collect()
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
