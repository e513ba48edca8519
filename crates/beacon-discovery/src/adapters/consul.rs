//! Consul catalog adapter.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beacon_types::{Endpoint, HealthStatus, RawService, ServiceRecord, ServiceSource};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{CatalogClient, RegistryAdapter};
use crate::config::ConsulConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::source::DiscoverySource;

pub const CONSUL_SERVICE_TYPE: &str = "consul-service";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogInstance {
    #[serde(rename = "ServiceID", default)]
    service_id: String,
    #[serde(default)]
    service_name: String,
    #[serde(default)]
    node: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    service_address: String,
    #[serde(default)]
    service_port: u16,
    #[serde(default)]
    service_tags: Option<Vec<String>>,
    #[serde(default)]
    service_meta: Option<BTreeMap<String, String>>,
    #[serde(default)]
    datacenter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    #[serde(default)]
    checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheck {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentRegistration {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    meta: BTreeMap<String, String>,
}

/// Aggregate check statuses: `passing` if every check passes, `critical` if
/// any is critical, otherwise `warning`.
pub fn aggregate_checks<'a>(statuses: impl IntoIterator<Item = &'a str>) -> &'static str {
    let mut any_critical = false;
    let mut all_passing = true;
    for status in statuses {
        match status {
            "passing" => {}
            "critical" => {
                any_critical = true;
                all_passing = false;
            }
            _ => all_passing = false,
        }
    }
    if any_critical {
        "critical"
    } else if all_passing {
        "passing"
    } else {
        "warning"
    }
}

/// Polls the Consul catalog over its HTTP API.
pub struct ConsulAdapter {
    client: CatalogClient,
    config: ConsulConfig,
    connected: AtomicBool,
}

impl ConsulAdapter {
    pub fn new(config: ConsulConfig) -> DiscoveryResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| DiscoveryError::Configuration(format!("consul token: {}", e)))?;
            headers.insert("x-consul-token", value);
        }
        let client = CatalogClient::new(
            "consul",
            &config.url,
            Duration::from_millis(config.timeout_ms),
            headers,
            true,
        )?;
        Ok(Self {
            client,
            config,
            connected: AtomicBool::new(false),
        })
    }

    fn path(&self, path: &str) -> String {
        match &self.config.datacenter {
            Some(dc) => format!("{}?dc={}", path, dc),
            None => path.to_string(),
        }
    }

    async fn ensure_connected(&self) -> DiscoveryResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.connect().await
    }

    async fn service_health(&self, name: &str) -> Option<&'static str> {
        let path = self.path(&format!("/v1/health/service/{}", name));
        match self.client.get::<Vec<HealthEntry>>(&path).await {
            Ok(entries) => {
                let statuses: Vec<&str> = entries
                    .iter()
                    .flat_map(|e| e.checks.iter().map(|c| c.status.as_str()))
                    .collect();
                Some(aggregate_checks(statuses))
            }
            Err(e) => {
                debug!(service = %name, error = %e, "Consul health lookup failed");
                None
            }
        }
    }

    async fn expand_service(&self, name: &str, catalog_tags: &[String]) -> DiscoveryResult<RawService> {
        let path = self.path(&format!("/v1/catalog/service/{}", name));
        let instances: Vec<CatalogInstance> = self.client.get(&path).await?;
        let health = self.service_health(name).await;

        let mut service = RawService::new(name, CONSUL_SERVICE_TYPE, ServiceSource::Consul)
            .with_tag("consul");
        service.tags.extend(catalog_tags.iter().cloned());

        let mut instance_meta = Vec::new();
        let mut datacenters = BTreeSet::new();
        for instance in &instances {
            let host = if instance.service_address.is_empty() {
                instance.address.clone()
            } else {
                instance.service_address.clone()
            };
            let tags = instance.service_tags.clone().unwrap_or_default();
            let protocol = if tags.iter().any(|t| t == "https") {
                "https"
            } else if tags.iter().any(|t| t == "tcp") {
                "tcp"
            } else {
                "http"
            };
            if !host.is_empty() && instance.service_port > 0 {
                service
                    .endpoints
                    .push(Endpoint::new(protocol, host.clone(), Some(instance.service_port)));
            }
            service.tags.extend(tags);

            if let Some(meta) = &instance.service_meta {
                if service.version.is_none() {
                    service.version = meta.get("version").cloned();
                }
            }
            if let Some(dc) = &instance.datacenter {
                datacenters.insert(dc.clone());
            }
            instance_meta.push(json!({
                "id": instance.service_id,
                "node": instance.node,
                "address": host,
                "port": instance.service_port,
                "meta": instance.service_meta,
            }));
        }

        service.metadata.insert("instances".into(), json!(instance_meta));
        if !datacenters.is_empty() {
            service.metadata.insert("datacenters".into(), json!(datacenters));
        }
        if let Some(status) = health {
            service.metadata.insert("consul_health".into(), json!(status));
            service.health_status = status.parse::<HealthStatus>().ok();
        }
        if instances.is_empty() {
            service.status = "defined".to_string();
        }
        Ok(service)
    }
}

#[async_trait]
impl RegistryAdapter for ConsulAdapter {
    fn adapter_name(&self) -> &str {
        "consul"
    }

    async fn connect(&self) -> DiscoveryResult<()> {
        self.client
            .probe("/v1/status/leader")
            .await
            .map_err(|e| DiscoveryError::unavailable("consul", e))?;
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.client.base_url(), "Connected to Consul");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn discover_services(&self) -> DiscoveryResult<Vec<RawService>> {
        self.ensure_connected().await?;
        let catalog: BTreeMap<String, Vec<String>> =
            self.client.get(&self.path("/v1/catalog/services")).await?;

        let mut services = Vec::new();
        for (name, tags) in &catalog {
            if name == "consul" {
                continue;
            }
            match self.expand_service(name, tags).await {
                Ok(service) => services.push(service),
                Err(e) => warn!(service = %name, error = %e, "Failed to expand Consul service"),
            }
        }
        Ok(services)
    }

    async fn register_service(&self, service: &ServiceRecord) -> DiscoveryResult<()> {
        let endpoint = service.endpoints.iter().find(|e| e.port.is_some());
        let registration = AgentRegistration {
            id: service.id.clone(),
            name: service.name.clone(),
            tags: service.tags.iter().cloned().collect(),
            address: endpoint.map(|e| e.host.clone()),
            port: endpoint.and_then(|e| e.port),
            meta: service
                .version
                .iter()
                .map(|v| ("version".to_string(), v.clone()))
                .chain(std::iter::once(("source".to_string(), service.source.to_string())))
                .collect(),
        };
        self.client
            .put(&self.path("/v1/agent/service/register"), Some(&registration))
            .await
    }

    async fn deregister_service(&self, service_id: &str) -> DiscoveryResult<()> {
        let path = self.path(&format!("/v1/agent/service/deregister/{}", service_id));
        self.client.put::<()>(&path, None).await
    }

    async fn health_check(&self) -> bool {
        self.client.probe("/v1/status/leader").await.is_ok()
    }

    async fn disconnect(&self) -> DiscoveryResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DiscoverySource for ConsulAdapter {
    fn name(&self) -> &str {
        "consul"
    }

    fn source(&self) -> ServiceSource {
        ServiceSource::Consul
    }

    async fn discover(&self) -> DiscoveryResult<Vec<RawService>> {
        self.discover_services().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> ConsulAdapter {
        Mock::given(method("GET"))
            .and(path("/v1/status/leader"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("10.0.0.1:8300")))
            .mount(server)
            .await;
        ConsulAdapter::new(ConsulConfig {
            url: server.uri(),
            token: Some("acl-123".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_aggregate_checks() {
        assert_eq!(aggregate_checks(["passing", "passing"]), "passing");
        assert_eq!(aggregate_checks(["passing", "warning"]), "warning");
        assert_eq!(aggregate_checks(["warning", "critical"]), "critical");
    }

    #[tokio::test]
    async fn test_discover_expands_instances_with_health() {
        let server = MockServer::start().await;
        let consul = adapter(&server).await;

        Mock::given(method("GET"))
            .and(path("/v1/catalog/services"))
            .and(header("X-Consul-Token", "acl-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "consul": [],
                "billing": ["v2", "http"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/billing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ServiceID": "billing-1", "ServiceName": "billing", "Node": "n1",
                 "Address": "10.0.0.5", "ServiceAddress": "", "ServicePort": 8080,
                 "ServiceTags": ["v2"], "ServiceMeta": {"version": "2.1.0"}, "Datacenter": "dc1"},
                {"ServiceID": "billing-2", "ServiceName": "billing", "Node": "n2",
                 "Address": "10.0.0.6", "ServiceAddress": "10.1.0.6", "ServicePort": 8080,
                 "ServiceTags": ["v2"], "ServiceMeta": null, "Datacenter": "dc1"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/billing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Checks": [{"Status": "passing"}, {"Status": "passing"}]},
                {"Checks": [{"Status": "passing"}, {"Status": "critical"}]}
            ])))
            .mount(&server)
            .await;

        let services = consul.discover_services().await.unwrap();
        assert_eq!(services.len(), 1);
        let billing = &services[0];
        assert_eq!(billing.name, "billing");
        assert_eq!(billing.source, ServiceSource::Consul);
        assert_eq!(billing.endpoints.len(), 2);
        assert_eq!(billing.endpoints[0].host, "10.0.0.5");
        assert_eq!(billing.endpoints[1].host, "10.1.0.6");
        assert_eq!(billing.version.as_deref(), Some("2.1.0"));
        assert_eq!(billing.health_status, Some(HealthStatus::Unhealthy));
        assert_eq!(billing.metadata["consul_health"], "critical");
        assert!(billing.tags.contains("v2"));
    }

    #[tokio::test]
    async fn test_register_sends_agent_payload() {
        let server = MockServer::start().await;
        let consul = adapter(&server).await;

        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/register"))
            .and(body_partial_json(json!({"Name": "api", "Port": 3000})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut raw = RawService::new("api", "node", ServiceSource::Local);
        raw.endpoints.push(Endpoint::http("localhost", 3000));
        consul
            .register_service(&ServiceRecord::from(raw))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_consul_is_unavailable() {
        let consul = ConsulAdapter::new(ConsulConfig {
            url: "http://127.0.0.1:1".into(),
            timeout_ms: 200,
            ..Default::default()
        })
        .unwrap();
        let err = consul.discover_services().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::SourceUnavailable { .. }));
        assert!(!consul.health_check().await);
    }
}
