//! Eureka registry adapter.
//!
//! Eureka's JSON collapses one-element arrays into bare objects and encodes
//! ports as `{"$": 8080, "@enabled": "true"}`, with either field possibly a
//! string. The wire types below accept every variant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beacon_types::{Endpoint, HealthStatus, RawService, ServiceRecord, ServiceSource};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{CatalogClient, RegistryAdapter};
use crate::config::EurekaConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::source::DiscoverySource;

pub const EUREKA_SERVICE_TYPE: &str = "eureka-service";

/// Accept either a single object or an array of them.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(serde::de::Error::custom))
            .collect(),
        other => serde_json::from_value(other)
            .map(|v| vec![v])
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct AppsEnvelope {
    applications: Applications,
}

#[derive(Debug, Deserialize)]
struct Applications {
    #[serde(default, deserialize_with = "one_or_many")]
    application: Vec<Application>,
}

#[derive(Debug, Deserialize)]
struct Application {
    name: String,
    #[serde(default, deserialize_with = "one_or_many")]
    instance: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    host_name: Option<String>,
    #[serde(rename = "ipAddr", default)]
    ip_addr: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    port: Option<PortInfo>,
    #[serde(default)]
    secure_port: Option<PortInfo>,
    #[serde(default)]
    health_check_url: Option<String>,
    #[serde(default)]
    home_page_url: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, Value>>,
}

impl Instance {
    fn host(&self) -> Option<&str> {
        self.ip_addr
            .as_deref()
            .or(self.host_name.as_deref())
            .filter(|h| !h.is_empty())
    }

    fn is_up(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("UP"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct PortInfo {
    #[serde(rename = "$")]
    port: Value,
    #[serde(rename = "@enabled", default)]
    enabled: Value,
}

impl PortInfo {
    fn enabled_port(&self) -> Option<u16> {
        let enabled = match &self.enabled {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        if !enabled {
            return None;
        }
        match &self.port {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .filter(|p| *p > 0)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceRegistration {
    instance: RegistrationBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationBody {
    instance_id: String,
    host_name: String,
    app: String,
    #[serde(rename = "ipAddr")]
    ip_addr: String,
    status: &'static str,
    port: Value,
    data_center_info: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    health_check_url: Option<String>,
}

/// Roll instance states up into one health value.
pub fn instances_health(up: usize, total: usize) -> HealthStatus {
    if total == 0 || up == 0 {
        HealthStatus::Unhealthy
    } else if up == total {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unknown
    }
}

/// Reads applications from a Eureka server.
pub struct EurekaAdapter {
    client: CatalogClient,
    connected: AtomicBool,
}

impl EurekaAdapter {
    pub fn new(config: EurekaConfig) -> DiscoveryResult<Self> {
        let client = CatalogClient::new(
            "eureka",
            &config.url,
            Duration::from_millis(config.timeout_ms),
            HeaderMap::new(),
            true,
        )?;
        Ok(Self {
            client,
            connected: AtomicBool::new(false),
        })
    }

    fn app_to_service(app: &Application) -> RawService {
        let mut service = RawService::new(
            app.name.to_lowercase(),
            EUREKA_SERVICE_TYPE,
            ServiceSource::Eureka,
        )
        .with_tag("eureka");

        let mut instances = Vec::new();
        for instance in &app.instance {
            if let Some(host) = instance.host() {
                if let Some(port) = instance.port.as_ref().and_then(PortInfo::enabled_port) {
                    service.endpoints.push(Endpoint::new("http", host, Some(port)));
                }
                if let Some(port) = instance
                    .secure_port
                    .as_ref()
                    .and_then(PortInfo::enabled_port)
                {
                    service.endpoints.push(Endpoint::new("https", host, Some(port)));
                }
            }
            if let Some(url) = &instance.health_check_url {
                service
                    .metadata
                    .entry("health_endpoint")
                    .or_insert_with(|| json!(url));
            }
            if service.version.is_none() {
                service.version = instance
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("version"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            instances.push(json!({
                "instance_id": instance.instance_id,
                "host": instance.host(),
                "status": instance.status,
                "home_page_url": instance.home_page_url,
            }));
        }

        let up = app.instance.iter().filter(|i| i.is_up()).count();
        service.health_status = Some(instances_health(up, app.instance.len()));
        service.status = if up > 0 { "running" } else { "stopped" }.to_string();
        service.metadata.insert("eureka_app".into(), json!(app.name));
        service.metadata.insert("instances".into(), json!(instances));
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
impl RegistryAdapter for EurekaAdapter {
    fn adapter_name(&self) -> &str {
        "eureka"
    }

    async fn connect(&self) -> DiscoveryResult<()> {
        self.client
            .probe("/apps")
            .await
            .map_err(|e| DiscoveryError::unavailable("eureka", e))?;
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.client.base_url(), "Connected to Eureka");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn discover_services(&self) -> DiscoveryResult<Vec<RawService>> {
        self.ensure_connected().await?;
        let envelope: AppsEnvelope = self.client.get("/apps").await?;
        Ok(envelope
            .applications
            .application
            .iter()
            .map(Self::app_to_service)
            .collect())
    }

    async fn register_service(&self, service: &ServiceRecord) -> DiscoveryResult<()> {
        let endpoint = service
            .endpoints
            .iter()
            .find(|e| e.port.is_some())
            .ok_or_else(|| {
                DiscoveryError::Configuration(format!(
                    "service '{}' has no endpoint to register with eureka",
                    service.name
                ))
            })?;
        let app = service.name.to_uppercase();
        let body = InstanceRegistration {
            instance: RegistrationBody {
                instance_id: service.id.clone(),
                host_name: endpoint.host.clone(),
                app: app.clone(),
                ip_addr: endpoint.host.clone(),
                status: "UP",
                port: json!({"$": endpoint.port, "@enabled": "true"}),
                data_center_info: json!({
                    "@class": "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo",
                    "name": "MyOwn"
                }),
                health_check_url: service
                    .metadata
                    .get("health_endpoint")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
        };
        self.client.post(&format!("/apps/{}", app), &body).await
    }

    /// `service_id` is `APP/instanceId`.
    async fn deregister_service(&self, service_id: &str) -> DiscoveryResult<()> {
        let (app, instance) = service_id.split_once('/').ok_or_else(|| {
            DiscoveryError::Configuration(format!(
                "eureka deregistration id must be APP/instanceId, got '{}'",
                service_id
            ))
        })?;
        self.client
            .delete(&format!("/apps/{}/{}", app.to_uppercase(), instance))
            .await
    }

    async fn health_check(&self) -> bool {
        self.client.probe("/apps").await.is_ok()
    }

    async fn disconnect(&self) -> DiscoveryResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DiscoverySource for EurekaAdapter {
    fn name(&self) -> &str {
        "eureka"
    }

    fn source(&self) -> ServiceSource {
        ServiceSource::Eureka
    }

    async fn discover(&self) -> DiscoveryResult<Vec<RawService>> {
        self.discover_services().await
    }
}
