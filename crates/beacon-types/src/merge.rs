//! Merge rules for collapsing observations of the same service
//!
//! - Endpoints and health come from the higher-priority source
//! - Tags are unioned
//! - Metadata is deep-merged, incoming leaf values overwrite
//! - Status prefers the "more alive" value
//! - A newer observation from the same source supersedes endpoints, health
//!   and status outright
//!
//! Precedence is source-based; timestamps never decide a conflict.

use crate::service::{Metadata, ServiceRecord};
use crate::source::SourcePriority;
use serde_json::Value;

/// Recursively merge `incoming` into `target`.
///
/// Nested objects merge key by key; any other colliding value is replaced.
pub fn deep_merge(target: &mut Metadata, incoming: &Metadata) {
    for (key, value) in incoming {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                deep_merge(existing, update);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Rank of a lifecycle status; higher means more evidence the service is alive
pub fn status_liveness(status: &str) -> u8 {
    match status.trim().to_ascii_lowercase().as_str() {
        "running" | "healthy" | "up" => 3,
        "active" => 2,
        "" | "unknown" => 0,
        _ => 1,
    }
}

impl ServiceRecord {
    /// Fold another observation of the same service into this record
    pub fn merge_observation(&mut self, incoming: &ServiceRecord, priority: &SourcePriority) {
        let same_source = incoming.source == self.source;
        let incoming_preferred = same_source || priority.prefers(incoming.source, self.source);

        if incoming_preferred {
            if !incoming.endpoints.is_empty() {
                self.endpoints = incoming.endpoints.clone();
            }
            if incoming.health_status.is_some() {
                self.health_status = incoming.health_status;
                self.health_result = incoming.health_result.clone();
            }
        } else {
            if self.endpoints.is_empty() {
                self.endpoints = incoming.endpoints.clone();
            }
            if self.health_status.is_none() {
                self.health_status = incoming.health_status;
                self.health_result = incoming.health_result.clone();
            }
        }

        let current_rank = status_liveness(&self.status);
        let incoming_rank = status_liveness(&incoming.status);
        if same_source
            || incoming_rank > current_rank
            || (incoming_rank == current_rank && incoming_preferred)
        {
            self.status = incoming.status.clone();
        }

        self.tags.extend(incoming.tags.iter().cloned());
        deep_merge(&mut self.metadata, &incoming.metadata);

        for dep in &incoming.dependencies {
            if !self.dependencies.contains(dep) {
                self.dependencies.push(dep.clone());
            }
        }

        if self.location.is_none() {
            self.location = incoming.location.clone();
        }
        if self.version.is_none() {
            self.version = incoming.version.clone();
        }
        if self.owner.is_none() {
            self.owner = incoming.owner.clone();
        }
        if incoming.validation_result.is_some() {
            self.validated = incoming.validated;
            self.validation_result = incoming.validation_result.clone();
        }

        if incoming_preferred {
            self.source = incoming.source;
        }

        if incoming.discovered_at < self.discovered_at {
            self.discovered_at = incoming.discovered_at;
        }
        if incoming.updated_at > self.updated_at {
            self.updated_at = incoming.updated_at;
        }
        self.touch(incoming.last_seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::health::HealthStatus;
    use crate::service::RawService;
    use crate::source::ServiceSource;
    use serde_json::json;

    fn record(source: ServiceSource, status: &str) -> ServiceRecord {
        ServiceRecord::from(RawService::new("api", "node", source).with_status(status))
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut target = json!({"a": {"x": 1, "y": 2}, "b": "keep"})
            .as_object()
            .cloned()
            .unwrap();
        let incoming = json!({"a": {"y": 3, "z": 4}, "c": true})
            .as_object()
            .cloned()
            .unwrap();

        deep_merge(&mut target, &incoming);

        assert_eq!(
            Value::Object(target),
            json!({"a": {"x": 1, "y": 3, "z": 4}, "b": "keep", "c": true})
        );
    }

    #[test]
    fn test_live_source_wins_endpoints_and_health() {
        let mut local = record(ServiceSource::Local, "active");
        local.endpoints.push(Endpoint::http("localhost", 3000));

        let mut docker = record(ServiceSource::Docker, "running");
        docker.endpoints.push(Endpoint::http("localhost", 8080));
        docker.health_status = Some(HealthStatus::Healthy);

        local.merge_observation(&docker, &SourcePriority::default());

        assert_eq!(local.endpoints[0].port, Some(8080));
        assert_eq!(local.health_status, Some(HealthStatus::Healthy));
        assert_eq!(local.status, "running");
        assert_eq!(local.source, ServiceSource::Docker);
    }

    #[test]
    fn test_static_source_does_not_override_live() {
        let mut docker = record(ServiceSource::Docker, "running");
        docker.endpoints.push(Endpoint::http("localhost", 8080));

        let mut local = record(ServiceSource::Local, "active");
        local.endpoints.push(Endpoint::http("localhost", 3000));
        local.tags.insert("node".into());
        local.metadata.insert("description".into(), json!("API"));

        docker.merge_observation(&local, &SourcePriority::default());

        assert_eq!(docker.endpoints.len(), 1);
        assert_eq!(docker.endpoints[0].port, Some(8080));
        assert_eq!(docker.status, "running");
        assert!(docker.tags.contains("node"));
        assert_eq!(docker.metadata["description"], "API");
    }

    #[test]
    fn test_more_alive_status_wins_regardless_of_source() {
        let mut docker = record(ServiceSource::Docker, "unknown");
        let local = record(ServiceSource::Local, "active");
        docker.merge_observation(&local, &SourcePriority::default());
        assert_eq!(docker.status, "active");
    }

    #[test]
    fn test_explicit_priority_orders_live_sources() {
        let priority = SourcePriority::from_names(&["consul", "docker", "local"]).unwrap();

        let mut docker = record(ServiceSource::Docker, "running");
        docker.endpoints.push(Endpoint::http("localhost", 8080));

        let mut consul = record(ServiceSource::Consul, "running");
        consul.endpoints.push(Endpoint::http("10.0.0.9", 9000));

        docker.merge_observation(&consul, &priority);
        assert_eq!(docker.endpoints[0].port, Some(9000));
        assert_eq!(docker.source, ServiceSource::Consul);
    }

    #[test]
    fn test_same_source_observation_supersedes() {
        let mut before = record(ServiceSource::Docker, "running");
        before.endpoints.push(Endpoint::http("localhost", 8080));

        let mut after = record(ServiceSource::Docker, "exited");
        after.endpoints.push(Endpoint::http("localhost", 9090));

        before.merge_observation(&after, &SourcePriority::default());
        assert_eq!(before.status, "exited");
        assert_eq!(before.endpoints[0].port, Some(9090));
    }

    #[test]
    fn test_status_liveness_ranks() {
        assert!(status_liveness("running") > status_liveness("active"));
        assert!(status_liveness("active") > status_liveness("stopped"));
        assert!(status_liveness("stopped") > status_liveness("unknown"));
    }
}
