//! Full passes from a filesystem tree into a registry.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_discovery::{DiscoveryResult, DiscoverySource, LocalScanConfig, LocalScanner};
use beacon_orchestrator::{DiscoveryOptions, OrchestratorConfig, UnifiedDiscovery};
use beacon_registry::{HistoryAction, RegistryConfig, ServiceRegistry};
use beacon_types::{
    Endpoint, RawService, ServiceFilter, ServiceRecord, ServiceSource, SourcePriority,
};
use serde_json::Value;
use tempfile::TempDir;

fn write(dir: &Path, file: &str, contents: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(file), contents).unwrap();
}

fn svc_a_tree() -> TempDir {
    let root = TempDir::new().unwrap();
    write(
        &root.path().join("svc-a"),
        "package.json",
        r#"{"name":"svc-a","version":"1.0.0","main":"index.js","scripts":{"start":"node index.js"}}"#,
    );
    write(&root.path().join("svc-a"), "index.js", "console.log('svc-a');\n");
    root
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        check_health: false,
        ..Default::default()
    }
}

async fn registry() -> Arc<ServiceRegistry> {
    Arc::new(
        ServiceRegistry::open(RegistryConfig::in_memory(), SourcePriority::default())
            .await
            .unwrap(),
    )
}

fn local(root: &Path) -> Arc<LocalScanner> {
    Arc::new(LocalScanner::new(LocalScanConfig {
        roots: vec![root.to_path_buf()],
        ..Default::default()
    }))
}

#[tokio::test]
async fn test_local_tree_registered_once() {
    let root = svc_a_tree();
    let registry = registry().await;
    let discovery = UnifiedDiscovery::builder(config())
        .source(local(root.path()))
        .registry(Arc::clone(&registry))
        .build()
        .unwrap();

    let first = discovery.discover_all_services(&DiscoveryOptions::default()).await;
    assert_eq!(first.len(), 1);
    let record = &first[0];
    assert_eq!(record.name, "svc-a");
    assert_eq!(record.service_type, "node");

    let validation = record.validation_result.as_ref().unwrap();
    assert!(validation.is_valid, "issues: {:?}", validation.issues);
    assert!(validation
        .warnings
        .contains(&"Missing recommended field for node service: description".to_string()));
    assert!(record.metadata.contains_key("extracted"));

    let second = discovery.discover_all_services(&DiscoveryOptions::default()).await;
    assert_eq!(second[0].id, record.id);
    assert_eq!(registry.len().await, 1);

    let stats = discovery.get_discovery_stats().await;
    assert_eq!(stats.created, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.total_passes, 2);
    assert_eq!(stats.error_count, 0);
}

/// A record as JSON without the timestamps each pass rewrites.
fn steady_view(record: &ServiceRecord) -> Value {
    let mut value = serde_json::to_value(record).unwrap();
    let map = value.as_object_mut().unwrap();
    map.remove("last_seen");
    if let Some(Value::Object(validation)) = map.get_mut("validation_result") {
        validation.remove("validated_at");
    }
    if let Some(Value::Object(extracted)) = map
        .get_mut("metadata")
        .and_then(|m| m.get_mut("extracted"))
    {
        for summary in extracted.values_mut() {
            if let Value::Object(summary) = summary {
                summary.remove("extracted_at");
            }
        }
    }
    value
}

#[tokio::test]
async fn test_repeated_passes_are_idempotent() {
    let root = svc_a_tree();
    let registry = registry().await;
    let discovery = UnifiedDiscovery::builder(config())
        .source(local(root.path()))
        .registry(Arc::clone(&registry))
        .build()
        .unwrap();

    let options = DiscoveryOptions::default();
    let first = discovery.discover_all_services(&options).await;
    assert_eq!(first.len(), 1);
    for _ in 0..3 {
        discovery.discover_all_services(&options).await;
    }
    let stored = registry.list(&ServiceFilter::default(), None, 0).await;

    assert_eq!(stored.len(), 1);
    assert_eq!(steady_view(&stored[0]), steady_view(&first[0]));
    assert_eq!(stored[0].updated_at, first[0].updated_at);
    assert!(stored[0].last_seen >= first[0].last_seen);

    let history = registry.service_history(&first[0].id, 10).await.unwrap();
    let actions: Vec<_> = history.iter().map(|h| h.action).collect();
    assert_eq!(actions, vec![HistoryAction::Created]);
}

struct ContainerSource;

#[async_trait]
impl DiscoverySource for ContainerSource {
    fn name(&self) -> &str {
        "docker"
    }

    fn source(&self) -> ServiceSource {
        ServiceSource::Docker
    }

    async fn discover(&self) -> DiscoveryResult<Vec<RawService>> {
        let mut raw = RawService::new("svc-a", "node", ServiceSource::Docker).with_status("running");
        raw.endpoints.push(Endpoint::http("localhost", 8080));
        raw.tags.insert("container".into());
        Ok(vec![raw])
    }
}

#[tokio::test]
async fn test_container_and_local_observations_collapse() {
    let root = svc_a_tree();
    let registry = registry().await;
    let discovery = UnifiedDiscovery::builder(config())
        .source(local(root.path()))
        .source(Arc::new(ContainerSource))
        .registry(Arc::clone(&registry))
        .build()
        .unwrap();

    let records = discovery.discover_all_services(&DiscoveryOptions::default()).await;
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.source, ServiceSource::Docker);
    assert_eq!(record.status, "running");
    assert_eq!(record.endpoints[0].port, Some(8080));
    assert!(record.tags.contains("container"));
    assert_eq!(record.metadata["main"], "index.js");
    assert!(record.location.as_deref().unwrap().ends_with("svc-a"));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_source_selection_limits_pass() {
    let root = svc_a_tree();
    let discovery = UnifiedDiscovery::builder(config())
        .source(local(root.path()))
        .source(Arc::new(ContainerSource))
        .build()
        .unwrap();

    let options = DiscoveryOptions {
        sources: Some(vec!["docker".into()]),
        ..DiscoveryOptions::discover_only()
    };
    let records = discovery.discover_all_services(&options).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, ServiceSource::Docker);
    assert!(records[0].location.is_none());
}
