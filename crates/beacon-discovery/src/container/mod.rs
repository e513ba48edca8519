//! Container runtime discovery.
//!
//! [`ContainerDiscovery`] lists containers and swarm services on the
//! runtime and fails with `SourceUnavailable` when the runtime is down.
//! [`ComposeDiscovery`] reads compose definitions from disk and reports
//! as its own source, so it keeps working during a runtime outage.

pub mod compose;
pub mod heuristics;
pub mod runtime;
pub mod watcher;

pub use heuristics::{container_to_service, is_service_container, CONTAINER_SERVICE_TYPE};
pub use runtime::{
    ContainerDetails, ContainerEvent, ContainerRuntime, DockerCli, SwarmService,
};
pub use watcher::{ChangeCallback, ContainerChange, ContainerWatcher};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_types::{RawService, ServiceSource};
use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ContainerDiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::source::DiscoverySource;

/// Discovers containers and swarm services from a container runtime.
pub struct ContainerDiscovery {
    runtime: Arc<dyn ContainerRuntime>,
    config: ContainerDiscoveryConfig,
}

impl ContainerDiscovery {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ContainerDiscoveryConfig) -> Self {
        Self { runtime, config }
    }

    /// Discovery over the `docker` CLI named in the config.
    pub fn with_docker_cli(config: ContainerDiscoveryConfig) -> Self {
        let runtime = DockerCli::new(config.docker_binary.clone(), config.command_timeout());
        Self::new(Arc::new(runtime), config)
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }

    pub fn config(&self) -> &ContainerDiscoveryConfig {
        &self.config
    }

    /// Inspect `ids` in concurrent batches and keep the service containers.
    pub async fn analyze_containers(&self, ids: &[String]) -> Vec<RawService> {
        let batch_size = self.config.batch_size.max(1);
        let mut services = Vec::new();

        for batch in ids.chunks(batch_size) {
            let inspected =
                join_all(batch.iter().map(|id| self.runtime.inspect_container(id))).await;
            for (id, result) in batch.iter().zip(inspected) {
                match result {
                    Ok(details) if is_service_container(&details) => {
                        services.push(container_to_service(&details));
                    }
                    Ok(details) => {
                        debug!(container = %details.display_name(), "Container does not look like a service");
                    }
                    Err(e) => {
                        warn!(container = %id, error = %e, "Failed to inspect container");
                    }
                }
            }
        }
        services
    }

    async fn discover_containers(&self) -> DiscoveryResult<Vec<RawService>> {
        let ids = self.runtime.list_containers(self.config.include_stopped).await?;
        debug!(count = ids.len(), "Listed containers");
        Ok(self.analyze_containers(&ids).await)
    }

    async fn discover_swarm(&self) -> DiscoveryResult<Vec<RawService>> {
        if !self.config.include_swarm || !self.runtime.swarm_active().await? {
            return Ok(Vec::new());
        }
        let services = self.runtime.list_swarm_services().await?;
        Ok(services.iter().map(heuristics::swarm_to_service).collect())
    }

    /// Ping the runtime, then run the container and swarm passes concurrently.
    #[instrument(skip(self))]
    pub async fn discover_services(&self) -> DiscoveryResult<Vec<RawService>> {
        if let Err(e) = self.runtime.ping().await {
            error!(error = %e, "Container runtime unavailable");
            return Err(match e {
                DiscoveryError::SourceUnavailable { .. } => e,
                other => DiscoveryError::unavailable("docker", other),
            });
        }

        let swarm = async {
            self.discover_swarm().await.unwrap_or_else(|e| {
                warn!(error = %e, "Swarm service listing failed");
                Vec::new()
            })
        };
        let (containers, swarm) = tokio::join!(self.discover_containers(), swarm);
        let mut services = containers?;
        info!(
            containers = services.len(),
            swarm = swarm.len(),
            "Container discovery complete"
        );

        services.extend(swarm);
        Ok(services)
    }
}

#[async_trait]
impl DiscoverySource for ContainerDiscovery {
    fn name(&self) -> &str {
        "docker"
    }

    fn source(&self) -> ServiceSource {
        ServiceSource::Docker
    }

    async fn discover(&self) -> DiscoveryResult<Vec<RawService>> {
        self.discover_services().await
    }
}

/// Discovers services defined in compose files under the configured roots.
pub struct ComposeDiscovery {
    roots: Vec<PathBuf>,
    max_depth: usize,
}

impl ComposeDiscovery {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize) -> Self {
        Self { roots, max_depth }
    }

    pub fn from_config(config: &ContainerDiscoveryConfig) -> Self {
        Self::new(config.compose_roots.clone(), config.compose_max_depth)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[async_trait]
impl DiscoverySource for ComposeDiscovery {
    fn name(&self) -> &str {
        "compose"
    }

    fn source(&self) -> ServiceSource {
        ServiceSource::Compose
    }

    #[instrument(skip(self), fields(roots = self.roots.len()))]
    async fn discover(&self) -> DiscoveryResult<Vec<RawService>> {
        if self.roots.is_empty() {
            return Ok(Vec::new());
        }
        let roots = self.roots.clone();
        let depth = self.max_depth;
        let services = tokio::task::spawn_blocking(move || {
            compose::find_compose_files(&roots, depth)
                .iter()
                .flat_map(|file| compose::parse_compose_file(file))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| DiscoveryError::unavailable("compose", format!("scan task failed: {}", e)))?;

        info!(count = services.len(), "Compose discovery complete");
        Ok(services)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory runtime for discovery and watcher tests.

    use std::collections::BTreeMap;

    use tokio::sync::{mpsc, Mutex};

    use super::runtime::{ContainerConfig, ContainerState};
    use super::*;
    use crate::error::DiscoveryError;

    #[derive(Default)]
    pub struct FakeRuntime {
        pub available: bool,
        pub containers: Mutex<BTreeMap<String, ContainerDetails>>,
        pub swarm: Vec<SwarmService>,
        pub events: Mutex<Option<mpsc::Receiver<ContainerEvent>>>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self {
                available: true,
                ..Default::default()
            }
        }

        pub fn container(id: &str, name: &str, image: &str, running: bool) -> ContainerDetails {
            ContainerDetails {
                id: id.into(),
                name: format!("/{}", name),
                config: ContainerConfig {
                    image: image.into(),
                    ..Default::default()
                },
                state: ContainerState {
                    status: if running { "running" } else { "exited" }.into(),
                    running,
                    ..Default::default()
                },
                ..Default::default()
            }
        }

        pub async fn add(&self, details: ContainerDetails) {
            self.containers.lock().await.insert(details.id.clone(), details);
        }

        fn check(&self) -> DiscoveryResult<()> {
            if self.available {
                Ok(())
            } else {
                Err(DiscoveryError::unavailable("docker", "daemon not running"))
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ping(&self) -> DiscoveryResult<()> {
            self.check()
        }

        async fn list_containers(&self, all: bool) -> DiscoveryResult<Vec<String>> {
            self.check()?;
            Ok(self
                .containers
                .lock()
                .await
                .values()
                .filter(|c| all || c.state.running)
                .map(|c| c.id.clone())
                .collect())
        }

        async fn inspect_container(&self, id: &str) -> DiscoveryResult<ContainerDetails> {
            self.check()?;
            self.containers
                .lock()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| DiscoveryError::Parse(format!("no such container {}", id)))
        }

        async fn swarm_active(&self) -> DiscoveryResult<bool> {
            self.check()?;
            Ok(!self.swarm.is_empty())
        }

        async fn list_swarm_services(&self) -> DiscoveryResult<Vec<SwarmService>> {
            self.check()?;
            Ok(self.swarm.clone())
        }

        async fn events(&self) -> DiscoveryResult<mpsc::Receiver<ContainerEvent>> {
            self.check()?;
            self.events
                .lock()
                .await
                .take()
                .ok_or_else(|| DiscoveryError::unavailable("docker", "event stream already taken"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeRuntime;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_discovers_service_containers_only() {
        let runtime = FakeRuntime::new();
        runtime.add(FakeRuntime::container("a", "cache", "redis:7", true)).await;
        runtime.add(FakeRuntime::container("b", "shell", "busybox", true)).await;
        runtime.add(FakeRuntime::container("c", "old-db", "postgres:16", false)).await;

        let discovery = ContainerDiscovery::new(
            Arc::new(runtime),
            ContainerDiscoveryConfig {
                batch_size: 2,
                ..Default::default()
            },
        );
        let services = discovery.discover_services().await.unwrap();
        let names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["cache"]);
        assert_eq!(services[0].status, "running");
        assert_eq!(services[0].version.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_include_stopped() {
        let runtime = FakeRuntime::new();
        runtime.add(FakeRuntime::container("c", "old-db", "postgres:16", false)).await;

        let discovery = ContainerDiscovery::new(
            Arc::new(runtime),
            ContainerDiscoveryConfig {
                include_stopped: true,
                ..Default::default()
            },
        );
        let services = discovery.discover_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].status, "stopped");
    }

    #[tokio::test]
    async fn test_unavailable_runtime_is_a_source_error() {
        let runtime = FakeRuntime {
            available: false,
            ..Default::default()
        };
        let discovery = ContainerDiscovery::new(Arc::new(runtime), ContainerDiscoveryConfig::default());

        let err = discovery.discover().await.unwrap_err();
        match err {
            DiscoveryError::SourceUnavailable { name, reason } => {
                assert_eq!(name, "docker");
                assert!(reason.contains("daemon not running"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_compose_source_is_independent_of_runtime() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("docker-compose.yml"),
            "services:\n  web:\n    image: nginx\n    ports: [\"8080:80\"]\n",
        )
        .unwrap();

        let config = ContainerDiscoveryConfig {
            compose_roots: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let compose = ComposeDiscovery::from_config(&config);
        assert_eq!(compose.name(), "compose");
        assert_eq!(compose.source(), ServiceSource::Compose);

        let services = compose.discover().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].source, ServiceSource::Compose);
        assert_eq!(services[0].status, "defined");
    }

    #[tokio::test]
    async fn test_compose_without_roots_is_empty() {
        let compose = ComposeDiscovery::new(Vec::new(), 3);
        assert!(compose.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_swarm_services_when_active() {
        let runtime = FakeRuntime {
            available: true,
            swarm: vec![SwarmService {
                id: "s1".into(),
                name: "edge".into(),
                replicas: "1/1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let discovery = ContainerDiscovery::new(Arc::new(runtime), ContainerDiscoveryConfig::default());
        let services = discovery.discover_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].source, ServiceSource::Swarm);
    }
}
