//! HTTP GET probe.

use async_trait::async_trait;
use beacon_types::{HealthCheckResult, ProbeDescriptor, ProbeKind};
use reqwest::{redirect, Client};
use tracing::{debug, instrument};

use super::HealthProbe;
use crate::config::ProbeConfig;
use crate::error::{HealthError, HealthResult};
use crate::retry::{run_attempts, AttemptOutcome};

/// Issues a GET against the health endpoint; status < 400 is healthy.
pub struct HttpProbe {
    client: Client,
    config: ProbeConfig,
}

impl HttpProbe {
    pub fn new(config: ProbeConfig) -> HealthResult<Self> {
        let redirect_policy = if config.follow_redirects {
            redirect::Policy::limited(10)
        } else {
            redirect::Policy::none()
        };

        let client = Client::builder()
            .timeout(config.timeout())
            .redirect(redirect_policy)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| HealthError::ClientBuild(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Resolve the URL to probe from a descriptor.
    pub fn target_url(descriptor: &ProbeDescriptor) -> Option<String> {
        if let Some(url) = &descriptor.health_endpoint {
            return Some(url.clone());
        }
        match (&descriptor.host, descriptor.port) {
            (Some(host), Some(port)) => Some(format!("http://{}:{}/", host, port)),
            _ => None,
        }
    }

    async fn attempt(&self, url: &str) -> AttemptOutcome {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() < 400 {
                    AttemptOutcome::Healthy(format!("HTTP {}", status.as_u16()))
                } else {
                    AttemptOutcome::Unhealthy(format!("HTTP {}", status.as_u16()))
                }
            }
            Err(e) if e.is_timeout() => AttemptOutcome::TimedOut,
            Err(e) => AttemptOutcome::Unknown(format!("request failed: {}", e)),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }

    #[instrument(skip(self, descriptor))]
    async fn check(&self, descriptor: &ProbeDescriptor) -> HealthCheckResult {
        let Some(url) = Self::target_url(descriptor) else {
            return HealthCheckResult::unknown(ProbeKind::Http, "no health endpoint or host:port");
        };

        debug!(url = %url, "Executing HTTP probe");
        run_attempts(&self.config, ProbeKind::Http, |_| self.attempt(&url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::HealthStatus;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> ProbeConfig {
        ProbeConfig {
            timeout_ms: 300,
            retries: 2,
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    fn descriptor(url: String) -> ProbeDescriptor {
        ProbeDescriptor {
            health_endpoint: Some(url),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ok_is_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(config()).unwrap();
        let result = probe
            .check(&descriptor(format!("{}/health", server.uri())))
            .await;

        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.probe_type, ProbeKind::Http);
        assert!(result.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_server_error_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(config()).unwrap();
        let result = probe.check(&descriptor(server.uri())).await;

        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.reason.contains("503"));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(config()).unwrap();
        let result = probe.check(&descriptor(server.uri())).await;

        assert_eq!(result.status, HealthStatus::Timeout);
    }

    #[tokio::test]
    async fn test_missing_target_is_unknown() {
        let probe = HttpProbe::new(config()).unwrap();
        let result = probe.check(&ProbeDescriptor::default()).await;
        assert_eq!(result.status, HealthStatus::Unknown);
    }

    #[test]
    fn test_target_url_from_host_port() {
        let d = ProbeDescriptor {
            host: Some("localhost".into()),
            port: Some(8080),
            ..Default::default()
        };
        assert_eq!(HttpProbe::target_url(&d).as_deref(), Some("http://localhost:8080/"));
    }
}
