//! Probe selection from descriptor contents.

use std::sync::Arc;

use beacon_types::{HealthCheckResult, ProbeDescriptor, ProbeKind};
use tracing::debug;

use crate::config::ProbeConfig;
use crate::error::HealthResult;
use crate::probes::{
    AggregationPolicy, CompositeProbe, HealthProbe, HttpProbe, ProcessProbe, ScriptProbe, TcpProbe,
};

/// Builds probes for descriptors.
///
/// Selection order: health endpoint, host and port, script, process,
/// then TCP as the fallback.
#[derive(Debug, Clone, Default)]
pub struct ProbeFactory {
    config: ProbeConfig,
}

impl ProbeFactory {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Kind of probe that `for_descriptor` would build.
    pub fn select_kind(descriptor: &ProbeDescriptor) -> ProbeKind {
        if descriptor.health_endpoint.is_some() {
            ProbeKind::Http
        } else if descriptor.has_host_port() {
            ProbeKind::Tcp
        } else if descriptor.health_script.is_some() {
            ProbeKind::Script
        } else if descriptor.process_name.is_some() || descriptor.pid.is_some() {
            ProbeKind::Process
        } else {
            ProbeKind::Tcp
        }
    }

    pub fn build(&self, kind: ProbeKind) -> HealthResult<Arc<dyn HealthProbe>> {
        let probe: Arc<dyn HealthProbe> = match kind {
            ProbeKind::Http => Arc::new(HttpProbe::new(self.config.clone())?),
            ProbeKind::Tcp => Arc::new(TcpProbe::new(self.config.clone())),
            ProbeKind::Process => Arc::new(ProcessProbe::new(self.config.clone())),
            ProbeKind::Script => Arc::new(ScriptProbe::new(self.config.clone())),
            ProbeKind::Composite => Arc::new(CompositeProbe::new(Vec::new(), AggregationPolicy::All)),
        };
        Ok(probe)
    }

    pub fn for_descriptor(&self, descriptor: &ProbeDescriptor) -> HealthResult<Arc<dyn HealthProbe>> {
        let kind = Self::select_kind(descriptor);
        debug!(probe = %kind, "Selected probe");
        self.build(kind)
    }

    /// A composite over every probe the descriptor has inputs for.
    pub fn composite_for(
        &self,
        descriptor: &ProbeDescriptor,
        policy: AggregationPolicy,
    ) -> HealthResult<CompositeProbe> {
        let mut kinds = Vec::new();
        if descriptor.health_endpoint.is_some() {
            kinds.push(ProbeKind::Http);
        }
        if descriptor.has_host_port() {
            kinds.push(ProbeKind::Tcp);
        }
        if descriptor.health_script.is_some() {
            kinds.push(ProbeKind::Script);
        }
        if descriptor.process_name.is_some() || descriptor.pid.is_some() {
            kinds.push(ProbeKind::Process);
        }

        let probes = kinds
            .into_iter()
            .map(|k| self.build(k))
            .collect::<HealthResult<Vec<_>>>()?;
        Ok(CompositeProbe::new(probes, policy))
    }

    /// Select a probe and run it.
    pub async fn check(&self, descriptor: &ProbeDescriptor) -> HealthResult<HealthCheckResult> {
        let probe = self.for_descriptor(descriptor)?;
        Ok(probe.check(descriptor).await)
    }
}
