//! Shared attempt loop for all probes

use std::future::Future;
use std::time::Instant;

use beacon_types::{HealthCheckResult, ProbeKind};
use tracing::debug;

use crate::config::ProbeConfig;

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Healthy(String),
    Unhealthy(String),
    /// Attempt finished without a usable answer.
    Unknown(String),
    /// The probe's own transport reported a timeout.
    TimedOut,
}

/// Run up to `config.attempts()` attempts, each bounded by `config.timeout()`.
///
/// A healthy attempt returns immediately. Otherwise the final attempt's
/// outcome is returned. `retry_delay` is slept between attempts only.
pub async fn run_attempts<F, Fut>(
    config: &ProbeConfig,
    kind: ProbeKind,
    mut attempt: F,
) -> HealthCheckResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let attempts = config.attempts();
    let mut last = HealthCheckResult::unknown(kind, "no attempt made");

    for n in 1..=attempts {
        let started = Instant::now();
        let outcome = tokio::time::timeout(config.timeout(), attempt(n)).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(AttemptOutcome::Healthy(reason)) => {
                return HealthCheckResult::healthy(kind, reason).with_response_time(elapsed);
            }
            Ok(AttemptOutcome::Unhealthy(reason)) => {
                HealthCheckResult::unhealthy(kind, reason).with_response_time(elapsed)
            }
            Ok(AttemptOutcome::Unknown(reason)) => {
                HealthCheckResult::unknown(kind, reason).with_response_time(elapsed)
            }
            Ok(AttemptOutcome::TimedOut) | Err(_) => HealthCheckResult::timeout(kind, config.timeout()),
        };

        debug!(
            probe = %kind,
            attempt = n,
            attempts,
            status = %result.status,
            reason = %result.reason,
            "Probe attempt did not succeed"
        );

        last = result;
        if n < attempts {
            tokio::time::sleep(config.retry_delay()).await;
        }
    }

    if attempts > 1 {
        last.reason = format!("{} (after {} attempts)", last.reason, attempts);
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::HealthStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config(retries: u32) -> ProbeConfig {
        ProbeConfig {
            timeout_ms: 50,
            retries,
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_healthy_on_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_attempts(&fast_config(3), ProbeKind::Tcp, move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 2 {
                    AttemptOutcome::Healthy("ok".into())
                } else {
                    AttemptOutcome::Unhealthy("refused".into())
                }
            }
        })
        .await;

        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_last_attempt_decides() {
        let result = run_attempts(&fast_config(2), ProbeKind::Http, |n| async move {
            if n == 1 {
                AttemptOutcome::Unhealthy("500".into())
            } else {
                AttemptOutcome::Unknown("connection reset".into())
            }
        })
        .await;

        assert_eq!(result.status, HealthStatus::Unknown);
        assert!(result.reason.contains("after 2 attempts"));
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let started = Instant::now();
        let result = run_attempts(&fast_config(2), ProbeKind::Script, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            AttemptOutcome::Healthy("never".into())
        })
        .await;

        assert_eq!(result.status, HealthStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
