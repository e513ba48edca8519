//! Service observations and the unified service record

use crate::endpoint::Endpoint;
use crate::health::{HealthCheckResult, HealthStatus};
use crate::outcome::ValidationResult;
use crate::source::ServiceSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Source-specific metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Namespace for stable service ids derived from the dedup key
const SERVICE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1e_64c0_94a4_4b7e_9d3e_5c2b_b1f0_7a11);

/// Key that collapses observations of the same service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub name: String,
    pub service_type: String,
    pub location: Option<String>,
}

impl DedupKey {
    pub fn new(name: &str, service_type: &str, location: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            service_type: service_type.to_string(),
            location: location.map(str::to_string),
        }
    }

    /// Deterministic id for this key
    pub fn stable_id(&self) -> String {
        let material = format!(
            "{}\u{1f}{}\u{1f}{}",
            self.name,
            self.service_type,
            self.location.as_deref().unwrap_or("")
        );
        Uuid::new_v5(&SERVICE_ID_NAMESPACE, material.as_bytes()).to_string()
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.name,
            self.service_type,
            self.location.as_deref().unwrap_or("-")
        )
    }
}

/// A single observation produced by a discovery source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawService {
    pub name: String,

    /// Free-form classifier, e.g. "node", "docker-service", "k8s-deployment"
    #[serde(rename = "type")]
    pub service_type: String,

    pub source: ServiceSource,

    /// Lifecycle string: active, running, stopped, defined, maintenance
    pub status: String,

    #[serde(default)]
    pub health_status: Option<HealthStatus>,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Ids (or names) of services this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Filesystem path backing the service, when any
    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub owner: Option<String>,

    pub observed_at: DateTime<Utc>,
}

impl RawService {
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        source: ServiceSource,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            source,
            status: "active".to_string(),
            health_status: None,
            endpoints: Vec::new(),
            metadata: Metadata::new(),
            tags: BTreeSet::new(),
            dependencies: Vec::new(),
            location: None,
            version: None,
            owner: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.name, &self.service_type, self.location.as_deref())
    }
}

/// The unified, merged representation of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub service_type: String,

    pub source: ServiceSource,

    pub status: String,

    #[serde(default)]
    pub health_status: Option<HealthStatus>,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub owner: Option<String>,

    pub discovered_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_seen: DateTime<Utc>,

    #[serde(default)]
    pub validated: bool,

    #[serde(default)]
    pub validation_result: Option<ValidationResult>,

    #[serde(default)]
    pub health_result: Option<HealthCheckResult>,
}

impl ServiceRecord {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.name, &self.service_type, self.location.as_deref())
    }

    /// Advance `last_seen`; it never moves backwards
    pub fn touch(&mut self, seen_at: DateTime<Utc>) {
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }

    pub fn set_health(&mut self, result: HealthCheckResult) {
        self.health_status = Some(result.status);
        self.health_result = Some(result);
    }

    pub fn set_validation(&mut self, result: ValidationResult) {
        self.validated = true;
        self.validation_result = Some(result);
    }

    /// Lookup that checks first-class fields before metadata
    pub fn field(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "id" => Some(self.id.clone().into()),
            "name" => Some(self.name.clone().into()),
            "type" => Some(self.service_type.clone().into()),
            "location" => self.location.clone().map(Into::into),
            "version" => self
                .version
                .clone()
                .map(Into::into)
                .or_else(|| self.metadata.get("version").cloned()),
            "owner" => self
                .owner
                .clone()
                .map(Into::into)
                .or_else(|| self.metadata.get("owner").cloned()),
            other => self.metadata.get(other).cloned(),
        }
    }
}

impl From<RawService> for ServiceRecord {
    fn from(raw: RawService) -> Self {
        let id = raw.dedup_key().stable_id();
        let seen = raw.observed_at;
        Self {
            id,
            name: raw.name,
            service_type: raw.service_type,
            source: raw.source,
            status: raw.status,
            health_status: raw.health_status,
            endpoints: raw.endpoints,
            metadata: raw.metadata,
            tags: raw.tags,
            dependencies: raw.dependencies,
            location: raw.location,
            version: raw.version,
            owner: raw.owner,
            discovered_at: seen,
            updated_at: seen,
            last_seen: seen,
            validated: false,
            validation_result: None,
            health_result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_stable_id_is_deterministic() {
        let a = RawService::new("svc-a", "node", ServiceSource::Local).with_location("/srv/a");
        let b = RawService::new("svc-a", "node", ServiceSource::Docker).with_location("/srv/a");
        assert_eq!(ServiceRecord::from(a).id, ServiceRecord::from(b).id);
    }

    #[test]
    fn test_stable_id_depends_on_location() {
        let a = RawService::new("svc-a", "node", ServiceSource::Local).with_location("/srv/a");
        let b = RawService::new("svc-a", "node", ServiceSource::Local).with_location("/srv/b");
        assert_ne!(ServiceRecord::from(a).id, ServiceRecord::from(b).id);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut record = ServiceRecord::from(RawService::new("x", "node", ServiceSource::Local));
        let original = record.last_seen;
        record.touch(original - Duration::hours(1));
        assert_eq!(record.last_seen, original);
        record.touch(original + Duration::hours(1));
        assert!(record.last_seen > original);
    }

    #[test]
    fn test_record_serializes_type_field() {
        let record = ServiceRecord::from(RawService::new("x", "python", ServiceSource::Local));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "python");
        assert_eq!(json["source"], "local");
    }
}
