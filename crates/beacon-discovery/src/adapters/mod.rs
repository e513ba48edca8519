//! External catalog adapters and their manager.

pub mod client;
pub mod consul;
pub mod eureka;
pub mod kubernetes;

pub use client::CatalogClient;
pub use consul::ConsulAdapter;
pub use eureka::EurekaAdapter;
pub use kubernetes::KubernetesAdapter;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_types::{RawService, ServiceRecord};
use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::error::DiscoveryResult;

/// Common capability set of an external service catalog.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// Unique adapter name.
    fn adapter_name(&self) -> &str;

    /// Verify the catalog is reachable.
    async fn connect(&self) -> DiscoveryResult<()>;

    async fn discover_services(&self) -> DiscoveryResult<Vec<RawService>>;

    /// Publish a record into the catalog.
    async fn register_service(&self, service: &ServiceRecord) -> DiscoveryResult<()>;

    async fn deregister_service(&self, service_id: &str) -> DiscoveryResult<()>;

    /// Whether the catalog currently answers.
    async fn health_check(&self) -> bool;

    async fn disconnect(&self) -> DiscoveryResult<()>;
}

/// Named set of adapters, iterated in name order.
#[derive(Default, Clone)]
pub struct RegistryAdapterManager {
    adapters: BTreeMap<String, Arc<dyn RegistryAdapter>>,
}

impl RegistryAdapterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter, replacing any with the same name.
    pub fn add(&mut self, adapter: Arc<dyn RegistryAdapter>) {
        self.adapters
            .insert(adapter.adapter_name().to_string(), adapter);
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn RegistryAdapter>> {
        self.adapters.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RegistryAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Discover from every adapter concurrently; failing adapters are
    /// logged and skipped.
    #[instrument(skip(self), fields(adapters = self.adapters.len()))]
    pub async fn discover_all(&self) -> Vec<RawService> {
        let results = join_all(self.adapters.values().map(|a| a.discover_services())).await;

        let mut services = Vec::new();
        for (name, result) in self.adapters.keys().zip(results) {
            match result {
                Ok(found) => {
                    info!(adapter = %name, count = found.len(), "Adapter discovery complete");
                    services.extend(found);
                }
                Err(e) => warn!(adapter = %name, error = %e, "Adapter discovery failed"),
            }
        }
        services
    }

    /// Connect every adapter; returns per-adapter success.
    pub async fn connect_all(&self) -> BTreeMap<String, bool> {
        let results = join_all(self.adapters.values().map(|a| a.connect())).await;
        self.adapters
            .keys()
            .zip(results)
            .map(|(name, result)| {
                if let Err(e) = &result {
                    warn!(adapter = %name, error = %e, "Adapter failed to connect");
                }
                (name.clone(), result.is_ok())
            })
            .collect()
    }

    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let results = join_all(self.adapters.values().map(|a| a.health_check())).await;
        self.adapters.keys().cloned().zip(results).collect()
    }

    pub async fn disconnect_all(&self) {
        let results = join_all(self.adapters.values().map(|a| a.disconnect())).await;
        for (name, result) in self.adapters.keys().zip(results) {
            if let Err(e) = result {
                warn!(adapter = %name, error = %e, "Adapter failed to disconnect");
            }
        }
    }
}
