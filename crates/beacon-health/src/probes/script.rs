//! External script probe.

use std::process::Stdio;

use async_trait::async_trait;
use beacon_types::{HealthCheckResult, ProbeDescriptor, ProbeKind};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::HealthProbe;
use crate::config::ProbeConfig;
use crate::retry::{run_attempts, AttemptOutcome};

/// Maximum stderr characters carried into the result reason.
const MAX_STDERR_CHARS: usize = 200;

/// Runs a command; exit code 0 is healthy. The child is killed when an
/// attempt exceeds its timeout.
pub struct ScriptProbe {
    config: ProbeConfig,
}

impl ScriptProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn attempt(script: &str, args: &[String]) -> AttemptOutcome {
        let output = Command::new(script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                AttemptOutcome::Healthy(format!("'{}' exited with 0", script))
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
                let code = output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                if stderr.is_empty() {
                    AttemptOutcome::Unhealthy(format!("'{}' exited with {}", script, code))
                } else {
                    AttemptOutcome::Unhealthy(format!("'{}' exited with {}: {}", script, code, stderr))
                }
            }
            Err(e) => AttemptOutcome::Unhealthy(format!("failed to run '{}': {}", script, e)),
        }
    }
}

#[async_trait]
impl HealthProbe for ScriptProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Script
    }

    #[instrument(skip(self, descriptor))]
    async fn check(&self, descriptor: &ProbeDescriptor) -> HealthCheckResult {
        let Some(script) = descriptor.health_script.as_deref() else {
            return HealthCheckResult::unknown(ProbeKind::Script, "no health script");
        };
        let args = &descriptor.health_script_args;

        debug!(script = %script, "Executing script probe");
        run_attempts(&self.config, ProbeKind::Script, |_| Self::attempt(script, args)).await
    }
}
