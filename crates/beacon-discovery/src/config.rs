//! Discovery source configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Local filesystem scanner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalScanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directories to walk.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Maximum directory depth below each root.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Directory names never descended into, in addition to hidden ones.
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,

    /// Source files larger than this are not grepped.
    #[serde(default = "default_max_grep_bytes")]
    pub max_grep_bytes: u64,

    /// Source files grepped per directory.
    #[serde(default = "default_max_grep_files")]
    pub max_grep_files: usize,
}

impl Default for LocalScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            roots: Vec::new(),
            max_depth: default_max_depth(),
            skip_dirs: default_skip_dirs(),
            max_grep_bytes: default_max_grep_bytes(),
            max_grep_files: default_max_grep_files(),
        }
    }
}

/// Container runtime discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path or name of the docker CLI.
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Also report stopped containers.
    #[serde(default)]
    pub include_stopped: bool,

    /// Containers inspected concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Directories searched for compose files.
    #[serde(default)]
    pub compose_roots: Vec<PathBuf>,

    /// Maximum depth of the compose file search.
    #[serde(default = "default_max_depth")]
    pub compose_max_depth: usize,

    /// Report swarm services when the runtime is a swarm manager.
    #[serde(default = "default_true")]
    pub include_swarm: bool,

    /// Timeout for one runtime CLI command, in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for ContainerDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            docker_binary: default_docker_binary(),
            include_stopped: false,
            batch_size: default_batch_size(),
            compose_roots: Vec::new(),
            compose_max_depth: default_max_depth(),
            include_swarm: true,
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ContainerDiscoveryConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Consul catalog adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsulConfig {
    #[serde(default = "default_consul_url")]
    pub url: String,

    /// ACL token sent as `X-Consul-Token`.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub datacenter: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            url: default_consul_url(),
            token: None,
            datacenter: None,
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Kubernetes API adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_kubernetes_url")]
    pub api_url: String,

    /// Bearer token.
    #[serde(default)]
    pub token: Option<String>,

    /// File holding the bearer token, read at construction.
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            api_url: default_kubernetes_url(),
            token: None,
            token_file: None,
            namespace: default_namespace(),
            verify_ssl: true,
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Eureka adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EurekaConfig {
    /// Base URL including the context path, e.g. `http://host:8761/eureka`.
    #[serde(default = "default_eureka_url")]
    pub url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EurekaConfig {
    fn default() -> Self {
        Self {
            url: default_eureka_url(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// All discovery sources. Catalog adapters are enabled by being present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub local: LocalScanConfig,

    #[serde(default)]
    pub container: ContainerDiscoveryConfig,

    #[serde(default)]
    pub consul: Option<ConsulConfig>,

    #[serde(default)]
    pub kubernetes: Option<KubernetesConfig>,

    #[serde(default)]
    pub eureka: Option<EurekaConfig>,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    3
}

fn default_skip_dirs() -> Vec<String> {
    ["node_modules", "target", "__pycache__", "venv", "dist", "build"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_grep_bytes() -> u64 {
    512 * 1024
}

fn default_max_grep_files() -> usize {
    25
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_consul_url() -> String {
    "http://localhost:8500".to_string()
}

fn default_kubernetes_url() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_eureka_url() -> String {
    "http://localhost:8761/eureka".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.local.max_depth, 3);
        assert_eq!(config.container.batch_size, 10);
        assert!(!config.container.include_stopped);
        assert!(config.consul.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: DiscoveryConfig = toml::from_str(
            r#"
            [local]
            roots = ["/srv"]

            [consul]
            url = "http://consul:8500"
            "#,
        )
        .unwrap();
        assert_eq!(config.local.roots, vec![PathBuf::from("/srv")]);
        assert!(config.local.skip_dirs.iter().any(|d| d == "node_modules"));
        assert_eq!(config.consul.unwrap().timeout_ms, 5_000);
    }
}
