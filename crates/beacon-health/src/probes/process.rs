//! Process-table probe.

use async_trait::async_trait;
use beacon_types::{HealthCheckResult, ProbeDescriptor, ProbeKind};
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, instrument};

use super::HealthProbe;
use crate::config::ProbeConfig;
use crate::retry::{run_attempts, AttemptOutcome};

/// Looks a process up by PID (preferred) or name.
pub struct ProcessProbe {
    config: ProbeConfig,
}

#[derive(Debug, Clone)]
enum ProcessTarget {
    Pid(u32),
    Name(String),
}

impl ProcessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Blocking scan of the process table; callers run it on the blocking pool.
    fn lookup(target: &ProcessTarget) -> AttemptOutcome {
        let mut system = System::new();
        system.refresh_processes();

        let alive = |status: ProcessStatus| !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead);

        match target {
            ProcessTarget::Pid(pid) => match system.process(Pid::from_u32(*pid)) {
                Some(process) if alive(process.status()) => {
                    AttemptOutcome::Healthy(format!("process {} is running", pid))
                }
                Some(process) => AttemptOutcome::Unhealthy(format!(
                    "process {} is {}",
                    pid,
                    process.status()
                )),
                None => AttemptOutcome::Unhealthy(format!("process {} not found", pid)),
            },
            ProcessTarget::Name(name) => {
                let running = system
                    .processes_by_name(name)
                    .filter(|p| alive(p.status()))
                    .count();
                if running > 0 {
                    AttemptOutcome::Healthy(format!("{} '{}' process(es) running", running, name))
                } else {
                    AttemptOutcome::Unhealthy(format!("no running process named '{}'", name))
                }
            }
        }
    }
}

#[async_trait]
impl HealthProbe for ProcessProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Process
    }

    #[instrument(skip(self, descriptor))]
    async fn check(&self, descriptor: &ProbeDescriptor) -> HealthCheckResult {
        let target = match (descriptor.pid, &descriptor.process_name) {
            (Some(pid), _) => ProcessTarget::Pid(pid),
            (None, Some(name)) => ProcessTarget::Name(name.clone()),
            (None, None) => {
                return HealthCheckResult::unknown(ProbeKind::Process, "no pid or process name");
            }
        };

        debug!(target = ?target, "Executing process probe");
        run_attempts(&self.config, ProbeKind::Process, |_| {
            let target = target.clone();
            async move {
                tokio::task::spawn_blocking(move || Self::lookup(&target))
                    .await
                    .unwrap_or_else(|e| AttemptOutcome::Unknown(format!("process lookup panicked: {}", e)))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::HealthStatus;

    #[tokio::test]
    async fn test_own_pid_is_healthy() {
        let probe = ProcessProbe::new(ProbeConfig::default());
        let result = probe
            .check(&ProbeDescriptor {
                pid: Some(std::process::id()),
                ..Default::default()
            })
            .await;
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_missing_name_is_unhealthy() {
        let probe = ProcessProbe::new(ProbeConfig {
            retries: 1,
            ..Default::default()
        });
        let result = probe
            .check(&ProbeDescriptor {
                process_name: Some("definitely-not-a-real-process-name".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
    }
}
