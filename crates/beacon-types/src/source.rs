//! Discovery source identifiers and merge precedence

use crate::error::TypesError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Origin of a service observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceSource {
    /// Filesystem conventions (package.json, Dockerfile, ...)
    Local,
    /// Running or stopped containers
    Docker,
    /// Services declared in compose files
    Compose,
    /// Swarm-mode services
    Swarm,
    /// Consul catalog
    Consul,
    /// Kubernetes API server
    Kubernetes,
    /// Eureka registry
    Eureka,
}

impl ServiceSource {
    pub const ALL: [ServiceSource; 7] = [
        ServiceSource::Local,
        ServiceSource::Docker,
        ServiceSource::Compose,
        ServiceSource::Swarm,
        ServiceSource::Consul,
        ServiceSource::Kubernetes,
        ServiceSource::Eureka,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceSource::Local => "local",
            ServiceSource::Docker => "docker",
            ServiceSource::Compose => "compose",
            ServiceSource::Swarm => "swarm",
            ServiceSource::Consul => "consul",
            ServiceSource::Kubernetes => "kubernetes",
            ServiceSource::Eureka => "eureka",
        }
    }

    /// Whether the source reports live runtime state rather than static declarations
    pub fn is_live(&self) -> bool {
        !matches!(self, ServiceSource::Local | ServiceSource::Compose)
    }

    /// Whether records from this source are backed by files on disk
    pub fn is_filesystem_backed(&self) -> bool {
        matches!(self, ServiceSource::Local | ServiceSource::Compose)
    }
}

impl std::fmt::Display for ServiceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceSource {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ServiceSource::Local),
            "docker" => Ok(ServiceSource::Docker),
            "compose" | "docker-compose" => Ok(ServiceSource::Compose),
            "swarm" => Ok(ServiceSource::Swarm),
            "consul" => Ok(ServiceSource::Consul),
            "kubernetes" | "k8s" => Ok(ServiceSource::Kubernetes),
            "eureka" => Ok(ServiceSource::Eureka),
            other => Err(TypesError::UnknownSource(other.to_string())),
        }
    }
}

/// Explicit precedence among sources for conflicting endpoint/health data.
///
/// Earlier entries win. Sources missing from the list rank below every listed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePriority(Vec<ServiceSource>);

impl SourcePriority {
    pub fn new(order: Vec<ServiceSource>) -> Result<Self, TypesError> {
        let mut seen = Vec::with_capacity(order.len());
        for source in &order {
            if seen.contains(source) {
                return Err(TypesError::DuplicatePriority(source.to_string()));
            }
            seen.push(*source);
        }
        Ok(Self(order))
    }

    /// Parse a priority list from source names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, TypesError> {
        let order = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<ServiceSource>, _>>()?;
        Self::new(order)
    }

    /// Rank of a source; lower is stronger
    pub fn rank(&self, source: ServiceSource) -> usize {
        self.0
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.0.len())
    }

    /// True when `candidate` strictly outranks `current`
    pub fn prefers(&self, candidate: ServiceSource, current: ServiceSource) -> bool {
        self.rank(candidate) < self.rank(current)
    }

    pub fn order(&self) -> &[ServiceSource] {
        &self.0
    }
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self(vec![
            ServiceSource::Docker,
            ServiceSource::Swarm,
            ServiceSource::Kubernetes,
            ServiceSource::Consul,
            ServiceSource::Eureka,
            ServiceSource::Compose,
            ServiceSource::Local,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_aliases() {
        assert_eq!("k8s".parse::<ServiceSource>().unwrap(), ServiceSource::Kubernetes);
        assert_eq!("Docker".parse::<ServiceSource>().unwrap(), ServiceSource::Docker);
        assert!("zookeeper".parse::<ServiceSource>().is_err());
    }

    #[test]
    fn test_live_sources() {
        assert!(!ServiceSource::Local.is_live());
        assert!(!ServiceSource::Compose.is_live());
        assert!(ServiceSource::Docker.is_live());
        assert!(ServiceSource::Eureka.is_live());
    }

    #[test]
    fn test_default_priority_prefers_live_over_local() {
        let priority = SourcePriority::default();
        for source in ServiceSource::ALL {
            if source.is_live() {
                assert!(priority.prefers(source, ServiceSource::Local));
            }
        }
        assert!(!priority.prefers(ServiceSource::Local, ServiceSource::Local));
    }

    #[test]
    fn test_unlisted_sources_rank_last() {
        let priority = SourcePriority::from_names(&["consul", "docker"]).unwrap();
        assert!(priority.prefers(ServiceSource::Consul, ServiceSource::Docker));
        assert!(priority.prefers(ServiceSource::Docker, ServiceSource::Eureka));
        assert_eq!(priority.rank(ServiceSource::Local), priority.rank(ServiceSource::Eureka));
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let err = SourcePriority::from_names(&["docker", "local", "docker"]).unwrap_err();
        assert_eq!(err, TypesError::DuplicatePriority("docker".to_string()));
    }
}
