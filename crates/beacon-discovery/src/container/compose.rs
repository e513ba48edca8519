//! Compose file discovery.

use std::fs;
use std::path::{Path, PathBuf};

use beacon_types::{Endpoint, Metadata, RawService, ServiceSource};
use serde_json::json;
use serde_yaml::Value as Yaml;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::heuristics::{compose_dependency_id, protocol_for, CONTAINER_SERVICE_TYPE};

pub const COMPOSE_FILE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

const SENSITIVE_ENV: &[&str] = &["PASSWORD", "SECRET", "TOKEN", "KEY", "CREDENTIAL"];

/// Find compose files under `roots`, skipping hidden directories.
pub fn find_compose_files(roots: &[PathBuf], max_depth: usize) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .max_depth(max_depth + 1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !(e.file_name().to_string_lossy().starts_with('.')
                        || e.file_name() == "node_modules")
            });
        for entry in walker.flatten() {
            let is_compose = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map_or(false, |n| COMPOSE_FILE_NAMES.contains(&n));
            if is_compose {
                files.push(entry.into_path());
            }
        }
    }
    files
}

/// One published port of a compose service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposePort {
    pub host_ip: Option<String>,
    pub published: Option<u16>,
    pub target: u16,
    pub protocol: String,
}

/// Parse a short (`"127.0.0.1:8080:80/tcp"`) or long (`{target, published}`)
/// port entry.
pub fn parse_port(entry: &Yaml) -> Option<ComposePort> {
    match entry {
        Yaml::Number(n) => Some(ComposePort {
            host_ip: None,
            published: None,
            target: u16::try_from(n.as_u64()?).ok()?,
            protocol: "tcp".into(),
        }),
        Yaml::String(s) => {
            let (spec, protocol) = s.split_once('/').unwrap_or((s.as_str(), "tcp"));
            let parts: Vec<&str> = spec.rsplitn(3, ':').collect();
            let (host_ip, published, target) = match parts.as_slice() {
                [target] => (None, None, *target),
                [target, published] => (None, Some(*published), *target),
                [target, published, ip] => (Some(ip.to_string()), Some(*published), *target),
                _ => return None,
            };
            // Ranges ("8000-8002") keep their first port.
            let first = |p: &str| p.split('-').next().and_then(|p| p.parse::<u16>().ok());
            Some(ComposePort {
                host_ip,
                published: published.and_then(first),
                target: first(target)?,
                protocol: protocol.to_string(),
            })
        }
        Yaml::Mapping(map) => {
            let get = |k: &str| map.get(k);
            let as_port = |v: &Yaml| match v {
                Yaml::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
                Yaml::String(s) => s.parse().ok(),
                _ => None,
            };
            Some(ComposePort {
                host_ip: get("host_ip").and_then(|v| v.as_str()).map(str::to_string),
                published: get("published").and_then(as_port),
                target: get("target").and_then(as_port)?,
                protocol: get("protocol")
                    .and_then(|v| v.as_str())
                    .unwrap_or("tcp")
                    .to_string(),
            })
        }
        _ => None,
    }
}

/// Environment in list (`["K=V"]`) or map form, with sensitive values masked.
pub fn parse_environment(value: Option<&Yaml>) -> Metadata {
    let mut env = Metadata::new();
    let mut put = |key: &str, value: String| {
        let upper = key.to_ascii_uppercase();
        let masked = if SENSITIVE_ENV.iter().any(|s| upper.contains(s)) {
            "***".to_string()
        } else {
            value
        };
        env.insert(key.to_string(), json!(masked));
    };

    match value {
        Some(Yaml::Sequence(items)) => {
            for item in items.iter().filter_map(|i| i.as_str()) {
                let (k, v) = item.split_once('=').unwrap_or((item, ""));
                put(k, v.to_string());
            }
        }
        Some(Yaml::Mapping(map)) => {
            for (k, v) in map {
                let Some(k) = k.as_str() else { continue };
                let v = match v {
                    Yaml::String(s) => s.clone(),
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    _ => String::new(),
                };
                put(k, v);
            }
        }
        _ => {}
    }
    env
}

/// `depends_on` in list or map form.
pub fn parse_depends_on(value: Option<&Yaml>) -> Vec<String> {
    match value {
        Some(Yaml::Sequence(items)) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        Some(Yaml::Mapping(map)) => map
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse one compose file into `defined` observations.
pub fn parse_compose_file(path: &Path) -> Vec<RawService> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!(file = %path.display(), error = %e, "Skipping unreadable compose file");
            return Vec::new();
        }
    };
    let doc: Yaml = match serde_yaml::from_str(&text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Skipping malformed compose file");
            return Vec::new();
        }
    };

    let location = path
        .parent()
        .map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()))
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();

    let Some(services) = doc.get("services").and_then(|s| s.as_mapping()) else {
        return Vec::new();
    };

    services
        .iter()
        .filter_map(|(name, definition)| {
            let name = name.as_str()?;
            Some(compose_service(name, definition, path, &location))
        })
        .collect()
}

fn compose_service(name: &str, definition: &Yaml, file: &Path, location: &str) -> RawService {
    let mut service = RawService::new(name, CONTAINER_SERVICE_TYPE, ServiceSource::Compose)
        .with_status("defined")
        .with_location(location)
        .with_tag("compose");

    let meta = &mut service.metadata;
    meta.insert("compose_file".into(), json!(file.to_string_lossy()));
    if let Some(image) = definition.get("image").and_then(|i| i.as_str()) {
        meta.insert("image".into(), json!(image));
    }
    if let Some(build) = definition.get("build") {
        let context = build
            .as_str()
            .or_else(|| build.get("context").and_then(|c| c.as_str()))
            .unwrap_or(".");
        meta.insert("build_context".into(), json!(context));
    }
    if definition.get("healthcheck").is_some() {
        meta.insert("has_healthcheck".into(), json!(true));
    }

    let environment = parse_environment(definition.get("environment"));
    if !environment.is_empty() {
        meta.insert("environment".into(), serde_json::Value::Object(environment));
    }

    let mut exposed = Vec::new();
    for entry in definition
        .get("ports")
        .and_then(|p| p.as_sequence())
        .into_iter()
        .flatten()
    {
        let Some(port) = parse_port(entry) else { continue };
        exposed.push(port.target);
        if let Some(published) = port.published {
            let host = match port.host_ip.as_deref() {
                None | Some("0.0.0.0") | Some("") => "localhost".to_string(),
                Some(ip) => ip.to_string(),
            };
            service.endpoints.push(
                Endpoint::new(protocol_for(port.target, &port.protocol), host, Some(published))
                    .with_container_port(port.target),
            );
        }
    }
    if !exposed.is_empty() {
        service.metadata.insert("exposed_ports".into(), json!(exposed));
    }

    let depends_on = parse_depends_on(definition.get("depends_on"));
    if !depends_on.is_empty() {
        service.metadata.insert("depends_on".into(), json!(depends_on));
        service.dependencies = depends_on
            .iter()
            .map(|dep| compose_dependency_id(dep, location))
            .collect();
    }

    service
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMPOSE: &str = r#"
services:
  web:
    image: nginx:1.25
    ports:
      - "8080:80"
      - target: 443
        published: 8443
    depends_on:
      - api
  api:
    build: ./api
    ports:
      - "127.0.0.1:3000:3000/tcp"
      - "9229"
    environment:
      NODE_ENV: production
      DB_PASSWORD: hunter2
    depends_on:
      db:
        condition: service_healthy
  db:
    image: postgres:16
    environment:
      - POSTGRES_DB=app
"#;

    #[test]
    fn test_parse_compose_services() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("docker-compose.yml");
        fs::write(&file, COMPOSE).unwrap();

        let services = parse_compose_file(&file);
        assert_eq!(services.len(), 3);

        let web = services.iter().find(|s| s.name == "web").unwrap();
        assert_eq!(web.status, "defined");
        assert_eq!(web.source, ServiceSource::Compose);
        assert_eq!(web.endpoints.len(), 2);
        assert_eq!(web.endpoints[0].port, Some(8080));
        assert_eq!(web.endpoints[1].protocol, "https");

        let location = web.location.clone().unwrap();
        assert_eq!(web.dependencies, vec![compose_dependency_id("api", &location)]);

        let api = services.iter().find(|s| s.name == "api").unwrap();
        assert_eq!(api.endpoints.len(), 1);
        assert_eq!(api.endpoints[0].host, "127.0.0.1");
        assert_eq!(api.metadata["exposed_ports"], json!([3000, 9229]));
        assert_eq!(api.metadata["environment"]["DB_PASSWORD"], "***");
        assert_eq!(api.metadata["environment"]["NODE_ENV"], "production");
        assert_eq!(api.metadata["depends_on"], json!(["db"]));
        assert_eq!(api.metadata["build_context"], "./api");

        let db = services.iter().find(|s| s.name == "db").unwrap();
        assert_eq!(db.metadata["environment"]["POSTGRES_DB"], "app");
    }

    #[test]
    fn test_find_compose_files_skips_hidden() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("app/compose.yaml"), "services: {}").unwrap();
        fs::write(dir.path().join(".git/docker-compose.yml"), "services: {}").unwrap();

        let files = find_compose_files(&[dir.path().to_path_buf()], 3);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("app/compose.yaml"));
    }

    #[test]
    fn test_malformed_compose_is_skipped() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("compose.yml");
        fs::write(&file, "services: [unclosed").unwrap();
        assert!(parse_compose_file(&file).is_empty());
    }
}
