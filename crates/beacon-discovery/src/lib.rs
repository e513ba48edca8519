//! # Beacon Discovery - Service Observation Sources
//!
//! Each source turns one kind of origin into a list of
//! [`RawService`](beacon_types::RawService) observations:
//!
//! - [`local`]: filesystem conventions (manifests, Dockerfiles, unit files)
//! - [`container`]: containers and swarm services on the runtime, compose
//!   files as a separate source, plus a change watcher driven by runtime events
//! - [`adapters`]: external catalogs (Consul, Kubernetes, Eureka)
//!
//! Sources never merge or deduplicate; that happens downstream. A source
//! whose backend is unreachable fails with
//! [`DiscoveryError::SourceUnavailable`] and the caller carries on without it.

#![deny(unsafe_code)]

pub mod adapters;
pub mod config;
pub mod container;
pub mod error;
pub mod local;
pub mod source;

pub use adapters::{
    CatalogClient, ConsulAdapter, EurekaAdapter, KubernetesAdapter, RegistryAdapter,
    RegistryAdapterManager,
};
pub use config::{
    ConsulConfig, ContainerDiscoveryConfig, DiscoveryConfig, EurekaConfig, KubernetesConfig,
    LocalScanConfig,
};
pub use container::{
    ComposeDiscovery, ContainerChange, ContainerDiscovery, ContainerRuntime, ContainerWatcher,
    DockerCli,
};
pub use error::{DiscoveryError, DiscoveryResult};
pub use local::LocalScanner;
pub use source::DiscoverySource;
