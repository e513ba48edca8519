//! Composite probe aggregating several sub-probes.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use beacon_types::{HealthCheckResult, HealthStatus, ProbeDescriptor, ProbeKind};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::HealthProbe;

/// How sub-probe results combine into one status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPolicy {
    /// Every sub-probe must pass.
    #[default]
    All,
    /// One passing sub-probe is enough.
    Any,
}

/// Runs its sub-probes concurrently against the same descriptor.
pub struct CompositeProbe {
    probes: Vec<Arc<dyn HealthProbe>>,
    policy: AggregationPolicy,
}

impl CompositeProbe {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, policy: AggregationPolicy) -> Self {
        Self { probes, policy }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Combine sub-results under `policy`.
    ///
    /// When nothing passed and any sub-probe timed out, the overall status
    /// is `timeout` rather than `unhealthy`.
    pub fn aggregate(policy: AggregationPolicy, details: &[HealthCheckResult]) -> (HealthStatus, String) {
        let total = details.len();
        let passed = details.iter().filter(|r| r.status.is_healthy()).count();
        let timed_out = details
            .iter()
            .any(|r| r.status == HealthStatus::Timeout);

        if total == 0 {
            return (HealthStatus::Unknown, "no probes configured".to_string());
        }

        let ok = match policy {
            AggregationPolicy::All => passed == total,
            AggregationPolicy::Any => passed > 0,
        };

        let summary = format!("{}/{} probes passed", passed, total);
        if ok {
            (HealthStatus::Healthy, summary)
        } else if passed == 0 && timed_out {
            (HealthStatus::Timeout, summary)
        } else {
            (HealthStatus::Unhealthy, summary)
        }
    }
}

#[async_trait]
impl HealthProbe for CompositeProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Composite
    }

    #[instrument(skip(self, descriptor), fields(probes = self.probes.len()))]
    async fn check(&self, descriptor: &ProbeDescriptor) -> HealthCheckResult {
        let started = Instant::now();
        let details = join_all(self.probes.iter().map(|p| p.check(descriptor))).await;
        let (status, reason) = Self::aggregate(self.policy, &details);

        debug!(status = %status, reason = %reason, "Composite probe finished");
        HealthCheckResult::new(status, ProbeKind::Composite, reason)
            .with_response_time(started.elapsed())
            .with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(HealthStatus);

    #[async_trait]
    impl HealthProbe for Fixed {
        fn kind(&self) -> ProbeKind {
            ProbeKind::Tcp
        }

        async fn check(&self, _descriptor: &ProbeDescriptor) -> HealthCheckResult {
            HealthCheckResult::new(self.0, ProbeKind::Tcp, "fixed")
        }
    }

    fn composite(statuses: &[HealthStatus], policy: AggregationPolicy) -> CompositeProbe {
        let probes = statuses
            .iter()
            .map(|s| Arc::new(Fixed(*s)) as Arc<dyn HealthProbe>)
            .collect();
        CompositeProbe::new(probes, policy)
    }

    #[tokio::test]
    async fn test_all_policy_requires_every_probe() {
        let probe = composite(
            &[HealthStatus::Healthy, HealthStatus::Unhealthy],
            AggregationPolicy::All,
        );
        let result = probe.check(&ProbeDescriptor::default()).await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.details.len(), 2);
    }

    #[tokio::test]
    async fn test_any_policy_passes_with_one() {
        let probe = composite(
            &[HealthStatus::Timeout, HealthStatus::Healthy],
            AggregationPolicy::Any,
        );
        let result = probe.check(&ProbeDescriptor::default()).await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.reason, "1/2 probes passed");
    }

    #[tokio::test]
    async fn test_timeout_wins_when_nothing_passed() {
        let probe = composite(
            &[HealthStatus::Unhealthy, HealthStatus::Timeout],
            AggregationPolicy::Any,
        );
        let result = probe.check(&ProbeDescriptor::default()).await;
        assert_eq!(result.status, HealthStatus::Timeout);
    }

    #[test]
    fn test_partial_pass_with_timeout_is_unhealthy_under_all() {
        let details = vec![
            HealthCheckResult::healthy(ProbeKind::Http, "ok"),
            HealthCheckResult::new(HealthStatus::Timeout, ProbeKind::Tcp, "slow"),
        ];
        let (status, _) = CompositeProbe::aggregate(AggregationPolicy::All, &details);
        assert_eq!(status, HealthStatus::Unhealthy);
    }
}
