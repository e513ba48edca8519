//! Kubernetes API adapter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beacon_types::{Endpoint, EndpointScope, HealthStatus, RawService, ServiceRecord, ServiceSource};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{CatalogClient, RegistryAdapter};
use crate::config::KubernetesConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::source::DiscoverySource;

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    creation_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KubeService {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceSpec {
    #[serde(rename = "clusterIP", default)]
    cluster_ip: Option<String>,
    #[serde(rename = "type", default)]
    service_type: Option<String>,
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePort {
    #[serde(default)]
    name: Option<String>,
    port: u16,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    node_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct Workload {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: WorkloadSpec,
    #[serde(default)]
    status: WorkloadStatus,
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadSpec {
    #[serde(default)]
    replicas: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadStatus {
    #[serde(default)]
    ready_replicas: Option<u32>,
}

/// Health of a workload from its ready and desired replica counts.
pub fn replica_health(ready: u32, desired: u32) -> (HealthStatus, &'static str) {
    if desired == 0 {
        (HealthStatus::Unknown, "stopped")
    } else if ready >= desired {
        (HealthStatus::Healthy, "running")
    } else if ready == 0 {
        (HealthStatus::Unhealthy, "stopped")
    } else {
        (HealthStatus::Unknown, "running")
    }
}

/// Reads Services, Deployments and StatefulSets from one namespace.
pub struct KubernetesAdapter {
    client: CatalogClient,
    namespace: String,
    connected: AtomicBool,
}

impl KubernetesAdapter {
    pub fn new(config: KubernetesConfig) -> DiscoveryResult<Self> {
        let token = match (&config.token, &config.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => Some(std::fs::read_to_string(path)?.trim().to_string()),
            (None, None) => None,
        };

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| DiscoveryError::Configuration(format!("kubernetes token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = CatalogClient::new(
            "kubernetes",
            &config.api_url,
            Duration::from_millis(config.timeout_ms),
            headers,
            config.verify_ssl,
        )?;
        Ok(Self {
            client,
            namespace: config.namespace,
            connected: AtomicBool::new(false),
        })
    }

    fn base_service(meta: &ObjectMeta, service_type: &str) -> RawService {
        let mut service = RawService::new(meta.name.clone(), service_type, ServiceSource::Kubernetes)
            .with_tag("kubernetes");
        if let Some(labels) = &meta.labels {
            service
                .tags
                .extend(labels.iter().map(|(k, v)| format!("{}={}", k, v)));
            if let Some(version) = labels.get("app.kubernetes.io/version") {
                service.version = Some(version.clone());
            }
            service.metadata.insert("labels".into(), json!(labels));
        }
        if let Some(namespace) = &meta.namespace {
            service.metadata.insert("namespace".into(), json!(namespace));
        }
        if let Some(uid) = &meta.uid {
            service.metadata.insert("uid".into(), json!(uid));
        }
        if let Some(created) = &meta.creation_timestamp {
            service.metadata.insert("created".into(), json!(created));
        }
        service
    }

    fn service_to_raw(svc: &KubeService) -> RawService {
        let mut service = Self::base_service(&svc.metadata, "k8s-service");
        let cluster_ip = svc.spec.cluster_ip.as_deref().filter(|ip| !ip.is_empty() && *ip != "None");

        if let Some(ip) = cluster_ip {
            for port in &svc.spec.ports {
                let name = port.name.clone().unwrap_or_default();
                let protocol = if name.contains("https") || port.port == 443 {
                    "https"
                } else if name.contains("http") || matches!(port.port, 80 | 8080) {
                    "http"
                } else {
                    match port.protocol.as_deref() {
                        Some("UDP") => "udp",
                        _ => "tcp",
                    }
                };
                let mut endpoint = Endpoint::new(protocol, ip, Some(port.port)).with_scope(EndpointScope::Internal);
                if !name.is_empty() {
                    endpoint = endpoint.with_kind(name);
                }
                service.endpoints.push(endpoint);
            }
        }

        let node_ports: Vec<u16> = svc.spec.ports.iter().filter_map(|p| p.node_port).collect();
        if !node_ports.is_empty() {
            service.metadata.insert("node_ports".into(), json!(node_ports));
        }
        if let Some(kind) = &svc.spec.service_type {
            service.metadata.insert("service_type".into(), json!(kind));
        }
        service
    }

    fn workload_to_raw(workload: &Workload, service_type: &str) -> RawService {
        let mut service = Self::base_service(&workload.metadata, service_type);
        let desired = workload.spec.replicas.unwrap_or(1);
        let ready = workload.status.ready_replicas.unwrap_or(0);
        let (health, status) = replica_health(ready, desired);
        service.health_status = Some(health);
        service.status = status.to_string();
        service.metadata.insert("replicas".into(), json!(desired));
        service.metadata.insert("ready_replicas".into(), json!(ready));
        service
    }

    async fn ensure_connected(&self) -> DiscoveryResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.connect().await
    }
}

#[async_trait]
impl RegistryAdapter for KubernetesAdapter {
    fn adapter_name(&self) -> &str {
        "kubernetes"
    }

    async fn connect(&self) -> DiscoveryResult<()> {
        self.client
            .probe("/version")
            .await
            .map_err(|e| DiscoveryError::unavailable("kubernetes", e))?;
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.client.base_url(), namespace = %self.namespace, "Connected to Kubernetes");
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn discover_services(&self) -> DiscoveryResult<Vec<RawService>> {
        self.ensure_connected().await?;
        let ns = &self.namespace;
        let services_path = format!("/api/v1/namespaces/{}/services", ns);
        let deployments_path = format!("/apis/apps/v1/namespaces/{}/deployments", ns);
        let statefulsets_path = format!("/apis/apps/v1/namespaces/{}/statefulsets", ns);

        let (services, deployments, statefulsets) = tokio::join!(
            self.client.get::<List<KubeService>>(&services_path),
            self.client.get::<List<Workload>>(&deployments_path),
            self.client.get::<List<Workload>>(&statefulsets_path),
        );

        let mut found = Vec::new();
        let mut failures = Vec::new();

        match services {
            Ok(list) => found.extend(list.items.iter().map(Self::service_to_raw)),
            Err(e) => failures.push(("services", e)),
        }
        match deployments {
            Ok(list) => found.extend(
                list.items
                    .iter()
                    .map(|w| Self::workload_to_raw(w, "k8s-deployment")),
            ),
            Err(e) => failures.push(("deployments", e)),
        }
        match statefulsets {
            Ok(list) => found.extend(
                list.items
                    .iter()
                    .map(|w| Self::workload_to_raw(w, "k8s-statefulset")),
            ),
            Err(e) => failures.push(("statefulsets", e)),
        }

        if failures.len() == 3 {
            let reason = failures
                .iter()
                .map(|(kind, e)| format!("{}: {}", kind, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DiscoveryError::unavailable("kubernetes", reason));
        }
        for (kind, e) in failures {
            warn!(resource = kind, error = %e, "Kubernetes listing failed");
        }
        Ok(found)
    }

    async fn register_service(&self, _service: &ServiceRecord) -> DiscoveryResult<()> {
        Err(DiscoveryError::unsupported("kubernetes", "register_service"))
    }

    async fn deregister_service(&self, _service_id: &str) -> DiscoveryResult<()> {
        Err(DiscoveryError::unsupported("kubernetes", "deregister_service"))
    }

    async fn health_check(&self) -> bool {
        self.client.probe("/version").await.is_ok()
    }

    async fn disconnect(&self) -> DiscoveryResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DiscoverySource for KubernetesAdapter {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn source(&self) -> ServiceSource {
        ServiceSource::Kubernetes
    }

    async fn discover(&self) -> DiscoveryResult<Vec<RawService>> {
        self.discover_services().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount(server: &MockServer, route: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_replica_health() {
        assert_eq!(replica_health(3, 3).0, HealthStatus::Healthy);
        assert_eq!(replica_health(0, 2).0, HealthStatus::Unhealthy);
        assert_eq!(replica_health(1, 2).0, HealthStatus::Unknown);
        assert_eq!(replica_health(0, 0).1, "stopped");
    }

    #[tokio::test]
    async fn test_discovers_services_and_workloads() {
        let server = MockServer::start().await;
        mount(&server, "/version", json!({"gitVersion": "v1.29.0"})).await;
        mount(
            &server,
            "/api/v1/namespaces/shop/services",
            json!({"items": [
                {"metadata": {"name": "cart", "namespace": "shop", "labels": {"app": "cart"}},
                 "spec": {"clusterIP": "10.96.0.12", "type": "ClusterIP",
                          "ports": [{"name": "http", "port": 80, "protocol": "TCP"}]}},
                {"metadata": {"name": "cart-headless"},
                 "spec": {"clusterIP": "None", "ports": [{"port": 6379}]}}
            ]}),
        )
        .await;
        mount(
            &server,
            "/apis/apps/v1/namespaces/shop/deployments",
            json!({"items": [
                {"metadata": {"name": "cart"}, "spec": {"replicas": 2}, "status": {"readyReplicas": 2}}
            ]}),
        )
        .await;
        mount(
            &server,
            "/apis/apps/v1/namespaces/shop/statefulsets",
            json!({"items": [
                {"metadata": {"name": "redis"}, "spec": {"replicas": 1}, "status": {}}
            ]}),
        )
        .await;

        let adapter = KubernetesAdapter::new(KubernetesConfig {
            api_url: server.uri(),
            token: Some("t0k".into()),
            namespace: "shop".into(),
            ..Default::default()
        })
        .unwrap();

        let services = adapter.discover_services().await.unwrap();
        assert_eq!(services.len(), 4);

        let cart = &services[0];
        assert_eq!(cart.service_type, "k8s-service");
        assert_eq!(cart.endpoints.len(), 1);
        assert_eq!(cart.endpoints[0].host, "10.96.0.12");
        assert_eq!(cart.endpoints[0].protocol, "http");
        assert_eq!(cart.endpoints[0].scope, EndpointScope::Internal);
        assert!(cart.tags.contains("app=cart"));

        assert!(services[1].endpoints.is_empty());

        let deployment = &services[2];
        assert_eq!(deployment.service_type, "k8s-deployment");
        assert!(deployment.endpoints.is_empty());
        assert_eq!(deployment.health_status, Some(HealthStatus::Healthy));

        let statefulset = &services[3];
        assert_eq!(statefulset.health_status, Some(HealthStatus::Unhealthy));
        assert_eq!(statefulset.status, "stopped");
    }

    #[tokio::test]
    async fn test_register_is_unsupported() {
        let adapter = KubernetesAdapter::new(KubernetesConfig::default()).unwrap();
        let record = ServiceRecord::from(RawService::new("x", "node", ServiceSource::Local));
        assert!(matches!(
            adapter.register_service(&record).await,
            Err(DiscoveryError::Unsupported { .. })
        ));
    }
}
