//! Component wiring and process lifecycle

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use beacon_discovery::{
    ComposeDiscovery, ConsulAdapter, ContainerDiscovery, ContainerRuntime, ContainerWatcher,
    DiscoverySource, DockerCli, EurekaAdapter, KubernetesAdapter, LocalScanner, RegistryAdapter,
    RegistryAdapterManager,
};
use beacon_orchestrator::{DiscoveryOptions, UnifiedDiscovery};
use beacon_registry::{ExportFormat, ServiceRegistry};
use beacon_types::{ServiceRecord, SourcePriority};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::BeaconConfig;
use crate::error::{DaemonError, DaemonResult};

/// A fully wired discovery daemon
pub struct Beacon {
    config: BeaconConfig,
    discovery: Arc<UnifiedDiscovery>,
    registry: Arc<ServiceRegistry>,
    adapters: RegistryAdapterManager,
    watcher: Option<ContainerWatcher>,
    changes: Option<mpsc::Receiver<beacon_discovery::ContainerChange>>,
}

struct Sources {
    sources: Vec<Arc<dyn DiscoverySource>>,
    adapters: RegistryAdapterManager,
    runtime: Option<Arc<dyn ContainerRuntime>>,
}

fn build_sources(config: &BeaconConfig) -> DaemonResult<Sources> {
    let discovery = &config.discovery;
    let mut sources: Vec<Arc<dyn DiscoverySource>> = Vec::new();
    let mut adapters = RegistryAdapterManager::new();
    let mut runtime = None;

    if discovery.local.enabled && !discovery.local.roots.is_empty() {
        sources.push(Arc::new(LocalScanner::new(discovery.local.clone())));
    }

    if discovery.container.enabled {
        let docker: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(
            discovery.container.docker_binary.clone(),
            discovery.container.command_timeout(),
        ));
        sources.push(Arc::new(ContainerDiscovery::new(
            Arc::clone(&docker),
            discovery.container.clone(),
        )));
        runtime = Some(docker);

        if !discovery.container.compose_roots.is_empty() {
            sources.push(Arc::new(ComposeDiscovery::from_config(&discovery.container)));
        }
    }

    if let Some(consul) = &discovery.consul {
        let adapter = Arc::new(ConsulAdapter::new(consul.clone())?);
        adapters.add(Arc::clone(&adapter) as Arc<dyn RegistryAdapter>);
        sources.push(adapter);
    }
    if let Some(kubernetes) = &discovery.kubernetes {
        let adapter = Arc::new(KubernetesAdapter::new(kubernetes.clone())?);
        adapters.add(Arc::clone(&adapter) as Arc<dyn RegistryAdapter>);
        sources.push(adapter);
    }
    if let Some(eureka) = &discovery.eureka {
        let adapter = Arc::new(EurekaAdapter::new(eureka.clone())?);
        adapters.add(Arc::clone(&adapter) as Arc<dyn RegistryAdapter>);
        sources.push(adapter);
    }

    Ok(Sources {
        sources,
        adapters,
        runtime,
    })
}

impl Beacon {
    pub async fn new(config: BeaconConfig) -> DaemonResult<Self> {
        let priority = SourcePriority::from_names(&config.orchestrator.source_priority)
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        let registry = ServiceRegistry::open(config.registry.clone(), priority)
            .await
            .map_err(|e| DaemonError::Storage(e.to_string()))?;
        let registry = Arc::new(registry);

        let Sources {
            sources,
            adapters,
            runtime,
        } = build_sources(&config)?;

        let (watcher, changes) = match runtime {
            Some(runtime) if config.watcher.enabled => {
                let (tx, rx) = mpsc::channel(config.watcher.channel_capacity.max(1));
                (Some(ContainerWatcher::new(runtime, Some(tx), None)), Some(rx))
            }
            _ => (None, None),
        };

        let discovery = UnifiedDiscovery::builder(config.orchestrator.clone())
            .sources(sources)
            .registry(Arc::clone(&registry))
            .validator(config.validator.clone())
            .health(config.health.clone())
            .extractor(config.metadata.clone())
            .build()?;

        info!(
            sources = ?discovery.source_names(),
            adapters = adapters.len(),
            database = %config.registry.database_url,
            records = registry.len().await,
            "Beacon initialized"
        );

        Ok(Self {
            config,
            discovery: Arc::new(discovery),
            registry,
            adapters,
            watcher,
            changes,
        })
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn discovery(&self) -> &Arc<UnifiedDiscovery> {
        &self.discovery
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    async fn connect_adapters(&self) {
        for (name, connected) in self.adapters.connect_all().await {
            if !connected {
                warn!(adapter = %name, "Catalog adapter unreachable; discovery will retry each pass");
            }
        }
    }

    /// One discovery pass followed by stale-record cleanup.
    pub async fn run_once(&self) -> DaemonResult<Vec<ServiceRecord>> {
        self.connect_adapters().await;
        let records = self
            .discovery
            .discover_all_services(&DiscoveryOptions::default())
            .await;
        let removed = self.registry.cleanup_stale_services().await;
        if removed > 0 {
            info!(removed, "Removed stale services");
        }
        self.shutdown().await;
        Ok(records)
    }

    /// Continuous discovery until `shutdown` resolves.
    pub async fn run_until<F>(mut self, interval: Duration, shutdown: F) -> DaemonResult<Self>
    where
        F: Future<Output = ()>,
    {
        self.connect_adapters().await;

        if let Some(watcher) = &self.watcher {
            if let Err(e) = watcher.start().await {
                warn!(error = %e, "Container watcher unavailable; relying on periodic passes");
            }
        }
        if let Some(changes) = self.changes.take() {
            self.discovery.attach_change_feed(changes).await?;
        }

        self.discovery.start_continuous_discovery(interval).await?;
        shutdown.await;

        info!("Beacon shutting down");
        self.shutdown().await;
        Ok(self)
    }

    async fn shutdown(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.stop().await;
        }
        self.discovery.cleanup().await;
        self.adapters.disconnect_all().await;
    }

    /// Write the registry contents to `path`; returns the record count.
    pub async fn export_to(&self, path: &Path, format: ExportFormat) -> DaemonResult<usize> {
        let data = self.registry.export(format).await?;
        tokio::fs::write(path, data).await?;
        let count = self.registry.len().await;
        info!(path = %path.display(), format = %format, count, "Exported registry");
        Ok(count)
    }
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("sources", &self.discovery.source_names())
            .field("adapters", &self.adapters.len())
            .field("watcher", &self.watcher.is_some())
            .finish()
    }
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_discovery::ConsulConfig;
    use std::fs;

    fn config_for(root: &Path) -> BeaconConfig {
        let mut config = BeaconConfig::default();
        config.registry.database_url = "memory".into();
        config.discovery.local.roots = vec![root.to_path_buf()];
        config.discovery.container.enabled = false;
        config.orchestrator.check_health = false;
        config
    }

    fn service_tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let svc = root.path().join("svc-a");
        fs::create_dir_all(&svc).unwrap();
        fs::write(
            svc.join("package.json"),
            r#"{"name":"svc-a","version":"1.0.0","main":"index.js"}"#,
        )
        .unwrap();
        root
    }

    #[tokio::test]
    async fn test_run_once_registers_and_exports() {
        let root = service_tree();
        let beacon = Beacon::new(config_for(root.path())).await.unwrap();

        let records = beacon.run_once().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(beacon.registry().len().await, 1);

        let out = root.path().join("services.json");
        assert_eq!(beacon.export_to(&out, ExportFormat::Json).await.unwrap(), 1);
        let exported: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(exported[0]["name"], "svc-a");
    }

    #[tokio::test]
    async fn test_unknown_priority_source_is_fatal() {
        let root = service_tree();
        let mut config = config_for(root.path());
        config.orchestrator.source_priority = vec!["docker".into(), "mainframe".into()];
        assert!(matches!(
            Beacon::new(config).await,
            Err(DaemonError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_catalog_adapter_shared_with_manager() {
        let root = service_tree();
        let mut config = config_for(root.path());
        config.discovery.consul = Some(ConsulConfig {
            url: "http://127.0.0.1:1".into(),
            ..Default::default()
        });
        let beacon = Beacon::new(config).await.unwrap();
        assert_eq!(beacon.discovery().source_names(), vec!["local", "consul"]);
        assert_eq!(beacon.adapters.len(), 1);
    }

    #[tokio::test]
    async fn test_compose_survives_runtime_outage() {
        let root = service_tree();
        fs::write(
            root.path().join("compose.yml"),
            "services:\n  cache:\n    image: redis:7\n",
        )
        .unwrap();

        let mut config = config_for(root.path());
        config.watcher.enabled = false;
        config.discovery.container.enabled = true;
        config.discovery.container.docker_binary = "/nonexistent/bin/docker".into();
        config.discovery.container.compose_roots = vec![root.path().to_path_buf()];

        let beacon = Beacon::new(config).await.unwrap();
        assert_eq!(
            beacon.discovery().source_names(),
            vec!["local", "docker", "compose"]
        );

        beacon.run_once().await.unwrap();

        let stats = beacon.discovery().get_discovery_stats().await;
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.per_source["docker"].errors, 1);
        assert_eq!(stats.per_source["compose"].errors, 0);
        assert_eq!(stats.per_source["compose"].services, 1);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_signal() {
        let root = service_tree();
        let beacon = Beacon::new(config_for(root.path())).await.unwrap();

        let beacon = beacon
            .run_until(
                Duration::from_secs(3600),
                tokio::time::sleep(Duration::from_millis(500)),
            )
            .await
            .unwrap();

        let stats = beacon.discovery().get_discovery_stats().await;
        assert_eq!(stats.total_passes, 1);
        assert!(!stats.continuous_running);
        assert_eq!(beacon.registry().len().await, 1);
    }
}
