//! Health types shared by probes, validator, and registry

use crate::endpoint::EndpointScope;
use crate::error::TypesError;
use crate::service::ServiceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Liveness status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
    Timeout,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
            HealthStatus::Timeout => "timeout",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" | "passing" | "up" => Ok(HealthStatus::Healthy),
            "unhealthy" | "critical" | "down" => Ok(HealthStatus::Unhealthy),
            "unknown" | "warning" | "starting" => Ok(HealthStatus::Unknown),
            "timeout" => Ok(HealthStatus::Timeout),
            other => Err(TypesError::UnknownHealthStatus(other.to_string())),
        }
    }
}

/// Kind of probe that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Tcp,
    Process,
    Script,
    Composite,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Http => write!(f, "http"),
            ProbeKind::Tcp => write!(f, "tcp"),
            ProbeKind::Process => write!(f, "process"),
            ProbeKind::Script => write!(f, "script"),
            ProbeKind::Composite => write!(f, "composite"),
        }
    }
}

/// Outcome of a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,

    /// Response time of the deciding attempt, in milliseconds
    #[serde(default)]
    pub response_time_ms: Option<u64>,

    /// Human-readable explanation
    pub reason: String,

    pub probe_type: ProbeKind,

    pub checked_at: DateTime<Utc>,

    /// Per-probe results for composite checks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<HealthCheckResult>,
}

impl HealthCheckResult {
    pub fn new(status: HealthStatus, probe_type: ProbeKind, reason: impl Into<String>) -> Self {
        Self {
            status,
            response_time_ms: None,
            reason: reason.into(),
            probe_type,
            checked_at: Utc::now(),
            details: Vec::new(),
        }
    }

    pub fn healthy(probe_type: ProbeKind, reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, probe_type, reason)
    }

    pub fn unhealthy(probe_type: ProbeKind, reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, probe_type, reason)
    }

    pub fn unknown(probe_type: ProbeKind, reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unknown, probe_type, reason)
    }

    pub fn timeout(probe_type: ProbeKind, after: Duration) -> Self {
        let mut result = Self::new(
            HealthStatus::Timeout,
            probe_type,
            format!("Probe timed out after {}ms", after.as_millis()),
        );
        result.response_time_ms = Some(after.as_millis() as u64);
        result
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn with_details(mut self, details: Vec<HealthCheckResult>) -> Self {
        self.details = details;
        self
    }
}

/// Input contract for health probes.
///
/// Any subset of fields may be populated; the probe factory picks a probe
/// from whichever are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    #[serde(default)]
    pub health_endpoint: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub health_script: Option<String>,
    #[serde(default)]
    pub health_script_args: Vec<String>,
}

impl ProbeDescriptor {
    pub fn is_empty(&self) -> bool {
        self.health_endpoint.is_none()
            && (self.host.is_none() || self.port.is_none())
            && self.process_name.is_none()
            && self.pid.is_none()
            && self.health_script.is_none()
    }

    pub fn has_host_port(&self) -> bool {
        self.host.is_some() && self.port.is_some()
    }

    /// Build a descriptor from what a record knows about itself.
    ///
    /// External endpoints are preferred over internal ones for host/port.
    pub fn from_record(record: &ServiceRecord) -> Self {
        let meta_str = |key: &str| {
            record
                .metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let health_endpoint = meta_str("health_endpoint").or_else(|| {
            record
                .endpoints
                .iter()
                .find(|e| e.kind == "health")
                .and_then(|e| e.url.clone())
        });

        let endpoint = record
            .endpoints
            .iter()
            .filter(|e| e.port.is_some())
            .min_by_key(|e| match e.scope {
                EndpointScope::External => 0,
                EndpointScope::Internal => 1,
            });

        let pid = record
            .metadata
            .get("pid")
            .and_then(|v| v.as_u64())
            .and_then(|p| u32::try_from(p).ok());

        let health_script_args = record
            .metadata
            .get("health_script_args")
            .and_then(|v| v.as_array())
            .map(|args| {
                args.iter()
                    .filter_map(|a| a.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            health_endpoint,
            host: endpoint.map(|e| e.host.clone()),
            port: endpoint.and_then(|e| e.port),
            process_name: meta_str("process_name"),
            pid,
            health_script: meta_str("health_script"),
            health_script_args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::service::RawService;
    use crate::source::ServiceSource;

    #[test]
    fn test_health_status_aliases() {
        assert_eq!("passing".parse::<HealthStatus>().unwrap(), HealthStatus::Healthy);
        assert_eq!("critical".parse::<HealthStatus>().unwrap(), HealthStatus::Unhealthy);
        assert_eq!("warning".parse::<HealthStatus>().unwrap(), HealthStatus::Unknown);
    }

    #[test]
    fn test_descriptor_prefers_external_endpoint() {
        let mut raw = RawService::new("api", "docker-service", ServiceSource::Docker);
        raw.endpoints.push(
            Endpoint::new("tcp", "172.17.0.2", Some(80)).with_scope(EndpointScope::Internal),
        );
        raw.endpoints.push(Endpoint::http("localhost", 8080));
        raw.metadata.insert("pid".into(), serde_json::json!(4242));

        let record = ServiceRecord::from(raw);
        let descriptor = ProbeDescriptor::from_record(&record);

        assert_eq!(descriptor.host.as_deref(), Some("localhost"));
        assert_eq!(descriptor.port, Some(8080));
        assert_eq!(descriptor.pid, Some(4242));
        assert!(!descriptor.is_empty());
    }

    #[test]
    fn test_empty_descriptor() {
        let record = ServiceRecord::from(RawService::new("cli", "node", ServiceSource::Local));
        assert!(ProbeDescriptor::from_record(&record).is_empty());
    }
}
