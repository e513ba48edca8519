//! Local filesystem scanner.
//!
//! Walks configured roots, scores each directory against the detection
//! table in [`rules`], and turns qualifying directories into observations.

mod grep;
mod manifest;
mod rules;

pub use grep::SourceHints;
pub use manifest::{parse_manifests, ManifestInfo};
pub use rules::{score_directory, Detection, TypeRule, RULES};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use beacon_types::{Endpoint, RawService, ServiceSource};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::LocalScanConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::source::DiscoverySource;

/// Discovers services from filesystem conventions.
#[derive(Debug, Clone, Default)]
pub struct LocalScanner {
    config: LocalScanConfig,
}

impl LocalScanner {
    pub fn new(config: LocalScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocalScanConfig {
        &self.config
    }

    /// Walk each root up to `max_depth` and return one observation per
    /// qualifying directory. Unreadable entries are logged and skipped.
    pub fn scan(&self, roots: &[PathBuf], max_depth: usize) -> Vec<RawService> {
        let mut services = Vec::new();

        for root in roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "Scan root is not a directory, skipping");
                continue;
            }

            let walker = WalkDir::new(root)
                .max_depth(max_depth)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| self.should_descend(e));

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!(error = %e, "Skipping unreadable path");
                        continue;
                    }
                };
                if !entry.file_type().is_dir() {
                    continue;
                }
                if let Some(service) = self.scan_directory(entry.path()) {
                    services.push(service);
                }
            }
        }

        info!(count = services.len(), roots = roots.len(), "Local scan complete");
        services
    }

    fn should_descend(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !self.config.skip_dirs.iter().any(|d| d.as_str() == name)
    }

    /// Evaluate a single directory.
    pub fn scan_directory(&self, dir: &Path) -> Option<RawService> {
        let file_names = match list_files(dir) {
            Ok(names) => names,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                return None;
            }
        };

        let mut cache: HashMap<PathBuf, Option<String>> = HashMap::new();
        let max_bytes = self.config.max_grep_bytes;
        let mut read_source = |path: &Path| -> Option<String> {
            cache
                .entry(path.to_path_buf())
                .or_insert_with(|| read_limited(path, max_bytes))
                .clone()
        };

        let detection = score_directory(&file_names, dir, &mut read_source)?;
        let manifest = parse_manifests(detection.service_type, dir, &file_names);

        let mut hints = SourceHints::default();
        for name in file_names
            .iter()
            .filter(|n| rules::has_extension(n, grep::GREP_EXTENSIONS))
            .take(self.config.max_grep_files)
        {
            if let Some(text) = read_source(&dir.join(name)) {
                hints.scan(&text);
            }
            if hints.is_complete() {
                break;
            }
        }

        Some(build_service(dir, &detection, manifest, hints))
    }
}

fn list_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn read_limited(path: &Path, max_bytes: u64) -> Option<String> {
    let size = fs::metadata(path).ok()?.len();
    if size > max_bytes {
        return None;
    }
    fs::read_to_string(path).ok()
}

fn build_service(dir: &Path, detection: &Detection, manifest: ManifestInfo, hints: SourceHints) -> RawService {
    let location = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let dir_name = location
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "service".to_string());

    let name = manifest.name.clone().unwrap_or(dir_name);
    let mut service = RawService::new(name, detection.service_type, ServiceSource::Local)
        .with_location(location.to_string_lossy())
        .with_tag(detection.service_type);

    service.version = manifest.version.clone();
    service.metadata = manifest.fields;
    if let Some(description) = manifest.description {
        service.metadata.insert("description".into(), json!(description));
    }
    if !manifest.dependencies.is_empty() {
        service
            .metadata
            .insert("package_dependencies".into(), json!(manifest.dependencies));
    }
    if !manifest.frameworks.is_empty() {
        service.metadata.insert("frameworks".into(), json!(manifest.frameworks));
        service.tags.extend(manifest.frameworks.iter().cloned());
    }
    service
        .metadata
        .insert("manifest_files".into(), json!(detection.markers));
    service
        .metadata
        .insert("detection_score".into(), json!(detection.score));

    let host = hints.host.unwrap_or_else(|| "localhost".to_string());
    match manifest.port.or(hints.port) {
        Some(port) => {
            let endpoint = Endpoint::http(host.clone(), port);
            let probe_host = if endpoint.binds_all_interfaces() {
                "localhost"
            } else {
                host.as_str()
            };
            if let Some(path) = &hints.health_path {
                service.metadata.insert(
                    "health_endpoint".into(),
                    json!(format!("http://{}:{}{}", probe_host, port, path)),
                );
            }
            service.endpoints.push(endpoint);
        }
        None => {
            if let Some(path) = hints.health_path {
                service.metadata.insert("health_path".into(), json!(path));
            }
        }
    }

    service
}

#[async_trait]
impl DiscoverySource for LocalScanner {
    fn name(&self) -> &str {
        "local"
    }

    fn source(&self) -> ServiceSource {
        ServiceSource::Local
    }

    #[instrument(skip(self), fields(roots = self.config.roots.len()))]
    async fn discover(&self) -> DiscoveryResult<Vec<RawService>> {
        if self.config.roots.is_empty() {
            return Ok(Vec::new());
        }
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&scanner.config.roots, scanner.config.max_depth))
            .await
            .map_err(|e| DiscoveryError::unavailable("local", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_node_service_from_package_json() {
        let root = TempDir::new().unwrap();
        let svc = root.path().join("svc-a");
        write(
            &svc,
            "package.json",
            r#"{"name":"svc-a","main":"index.js","scripts":{"start":"node index.js"}}"#,
        );

        let services = LocalScanner::default().scan(&[root.path().to_path_buf()], 3);
        assert_eq!(services.len(), 1);
        let service = &services[0];
        assert_eq!(service.name, "svc-a");
        assert_eq!(service.service_type, "node");
        assert_eq!(service.source, ServiceSource::Local);
        assert_eq!(service.metadata["main"], "index.js");
        assert!(service.location.as_deref().unwrap().ends_with("svc-a"));
        assert!(service.endpoints.is_empty());
    }

    #[test]
    fn test_grepped_port_and_health_path() {
        let root = TempDir::new().unwrap();
        let svc = root.path().join("api");
        write(&svc, "requirements.txt", "flask==2.3\n");
        write(
            &svc,
            "app.py",
            "from flask import Flask\napp = Flask(__name__)\n@app.route('/health')\ndef health(): return 'ok'\napp.run(host='0.0.0.0', port=5000)\n",
        );

        let services = LocalScanner::default().scan(&[root.path().to_path_buf()], 3);
        assert_eq!(services.len(), 1);
        let service = &services[0];
        assert_eq!(service.service_type, "python");
        assert_eq!(service.name, "api");
        assert_eq!(service.endpoints[0].port, Some(5000));
        assert_eq!(service.endpoints[0].host, "0.0.0.0");
        assert_eq!(service.metadata["health_endpoint"], "http://localhost:5000/health");
        assert!(service.tags.contains("flask"));
    }

    #[test]
    fn test_hidden_and_skipped_directories() {
        let root = TempDir::new().unwrap();
        write(&root.path().join(".cache/pkg"), "package.json", r#"{"name":"hidden"}"#);
        write(&root.path().join("node_modules/dep"), "package.json", r#"{"name":"dep"}"#);
        write(&root.path().join("app"), "go.mod", "module example.com/app\n");

        let services = LocalScanner::default().scan(&[root.path().to_path_buf()], 3);
        let names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app"]);
    }

    #[test]
    fn test_max_depth_is_respected() {
        let root = TempDir::new().unwrap();
        write(&root.path().join("a/b/c/d"), "Cargo.toml", "[package]\nname = \"deep\"\n");

        assert!(LocalScanner::default().scan(&[root.path().to_path_buf()], 3).is_empty());
        assert_eq!(LocalScanner::default().scan(&[root.path().to_path_buf()], 4).len(), 1);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let services = LocalScanner::default().scan(&[PathBuf::from("/definitely/not/here")], 3);
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn test_discover_uses_configured_roots() {
        let root = TempDir::new().unwrap();
        write(&root.path().join("unit"), "worker.service", "[Service]\nExecStart=/usr/bin/worker\n");

        let scanner = LocalScanner::new(LocalScanConfig {
            roots: vec![root.path().to_path_buf()],
            ..Default::default()
        });
        let services = scanner.discover().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "worker");
        assert_eq!(services[0].metadata["process_name"], "worker");
    }
}
