//! Record filters used by the registry and the orchestrator

use crate::health::HealthStatus;
use crate::service::ServiceRecord;
use crate::source::ServiceSource;
use serde::{Deserialize, Serialize};

/// Conjunctive filter over service records; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub service_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub source: Option<ServiceSource>,
    #[serde(default)]
    pub health_status: Option<HealthStatus>,
}

impl ServiceFilter {
    pub fn by_type(service_type: impl Into<String>) -> Self {
        Self {
            service_type: Some(service_type.into()),
            ..Default::default()
        }
    }

    pub fn by_source(source: ServiceSource) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, record: &ServiceRecord) -> bool {
        if let Some(name) = &self.name {
            if &record.name != name {
                return false;
            }
        }
        if let Some(service_type) = &self.service_type {
            if &record.service_type != service_type {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if &record.status != status {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !record.tags.contains(tag) {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if record.owner.as_ref() != Some(owner) {
                return false;
            }
        }
        if let Some(source) = self.source {
            if record.source != source {
                return false;
            }
        }
        if let Some(health) = self.health_status {
            if record.health_status != Some(health) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RawService;

    #[test]
    fn test_filter_conjunction() {
        let record = ServiceRecord::from(
            RawService::new("api", "node", ServiceSource::Local).with_tag("web"),
        );

        assert!(ServiceFilter::default().matches(&record));
        assert!(ServiceFilter::by_type("node").matches(&record));

        let filter = ServiceFilter {
            service_type: Some("node".into()),
            tag: Some("db".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&record));
    }
}
