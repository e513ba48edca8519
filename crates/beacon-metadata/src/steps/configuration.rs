//! Container build files, compose files and application config files.

use std::path::Path;

use beacon_types::{ExtractedMetadata, MetadataType};
use serde_json::{json, Map, Value};

use super::{read_with, ExtractionStep, FileErrors};
use crate::context::{display, file_name, ServiceContext};
use crate::error::MetadataResult;

const COMPOSE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Manifests owned by the dependencies step.
const MANIFESTS: &[&str] = &[
    "package.json",
    "package-lock.json",
    "Cargo.toml",
    "Cargo.lock",
    "pyproject.toml",
    "Pipfile",
    "Pipfile.lock",
    "poetry.lock",
];

const CONFIG_DIRS: &[&str] = &["config", "conf", "configs", "settings"];

/// Instructions pulled from a Dockerfile.
pub fn parse_dockerfile(text: &str) -> Value {
    let mut base_images = Vec::new();
    let mut exposed = Vec::new();
    let mut env_keys = Vec::new();
    let mut data = Map::new();

    // Join continuation lines first.
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    for line in joined.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (instruction, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let args = args.trim();
        match instruction.to_ascii_uppercase().as_str() {
            "FROM" => {
                if let Some(image) = args.split_whitespace().next() {
                    base_images.push(image.to_string());
                }
            }
            "EXPOSE" => {
                exposed.extend(
                    args.split_whitespace()
                        .filter_map(|p| p.split('/').next())
                        .filter_map(|p| p.parse::<u16>().ok()),
                );
            }
            "ENV" => {
                if args.contains('=') {
                    env_keys.extend(
                        args.split_whitespace()
                            .filter_map(|kv| kv.split_once('='))
                            .map(|(k, _)| k.to_string()),
                    );
                } else if let Some(key) = args.split_whitespace().next() {
                    env_keys.push(key.to_string());
                }
            }
            "WORKDIR" => {
                data.insert("workdir".into(), json!(args));
            }
            "USER" => {
                data.insert("user".into(), json!(args));
            }
            "ENTRYPOINT" => {
                data.insert("entrypoint".into(), json!(args));
            }
            "CMD" => {
                data.insert("cmd".into(), json!(args));
            }
            "HEALTHCHECK" => {
                data.insert("healthcheck".into(), json!(args));
            }
            _ => {}
        }
    }

    data.insert("base_images".into(), json!(base_images));
    data.insert("exposed_ports".into(), json!(exposed));
    data.insert("env_keys".into(), json!(env_keys));
    data.insert("multi_stage".into(), json!(base_images.len() > 1));
    Value::Object(data)
}

/// Service summary of a compose file.
pub fn parse_compose(text: &str) -> Result<Value, String> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
    let services = doc
        .get("services")
        .and_then(|s| s.as_mapping())
        .ok_or_else(|| "no services section".to_string())?;

    let mut out = Map::new();
    for (name, spec) in services {
        let Some(name) = name.as_str() else { continue };
        let mut entry = Map::new();
        if let Some(image) = spec.get("image").and_then(|v| v.as_str()) {
            entry.insert("image".into(), json!(image));
        }
        if spec.get("build").is_some() {
            entry.insert("build".into(), json!(true));
        }
        if let Some(ports) = spec.get("ports").and_then(|v| v.as_sequence()) {
            let ports: Vec<String> = ports
                .iter()
                .filter_map(|p| match p {
                    serde_yaml::Value::String(s) => Some(s.clone()),
                    serde_yaml::Value::Number(n) => Some(n.to_string()),
                    serde_yaml::Value::Mapping(_) => p
                        .get("target")
                        .map(|t| serde_yaml::to_string(t).unwrap_or_default().trim().to_string()),
                    _ => None,
                })
                .collect();
            entry.insert("ports".into(), json!(ports));
        }
        if let Some(deps) = spec.get("depends_on") {
            let deps: Vec<String> = match deps {
                serde_yaml::Value::Sequence(items) => items
                    .iter()
                    .filter_map(|d| d.as_str().map(str::to_string))
                    .collect(),
                serde_yaml::Value::Mapping(map) => map
                    .keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            entry.insert("depends_on".into(), json!(deps));
        }
        out.insert(name.to_string(), Value::Object(entry));
    }
    Ok(json!({ "services": out }))
}

fn top_level_keys(file: &Path, text: &str) -> Result<(&'static str, Vec<String>), String> {
    let extension = file.extension().and_then(|e| e.to_str()).unwrap_or("");
    match extension {
        "yaml" | "yml" => {
            let doc: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
            let keys = doc
                .as_mapping()
                .map(|m| m.keys().filter_map(|k| k.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            Ok(("yaml", keys))
        }
        "toml" => {
            let doc: toml::Table = text.parse().map_err(|e: toml::de::Error| e.to_string())?;
            Ok(("toml", doc.keys().cloned().collect()))
        }
        "json" => {
            let doc: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
            let keys = doc
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            Ok(("json", keys))
        }
        "ini" | "cfg" | "conf" | "properties" => {
            let keys = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with(';'))
                .filter_map(|l| {
                    if l.starts_with('[') {
                        Some(l.trim_matches(|c| c == '[' || c == ']').to_string())
                    } else {
                        l.split_once(['=', ':']).map(|(k, _)| k.trim().to_string())
                    }
                })
                .collect();
            Ok(("ini", keys))
        }
        _ => Err(format!("unsupported config format '{}'", extension)),
    }
}

fn is_config_file(path: &Path) -> bool {
    let name = file_name(path);
    if MANIFESTS.contains(&name) || COMPOSE_NAMES.contains(&name) {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("openapi") || lower.starts_with("swagger") {
        return false;
    }
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let in_config_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(|n| CONFIG_DIRS.contains(&n))
        .unwrap_or(false);
    let at_root = path.components().count() == 1;

    match extension {
        "yaml" | "yml" | "toml" | "ini" | "cfg" | "conf" | "properties" => at_root || in_config_dir,
        "json" => in_config_dir || (at_root && (lower.contains("config") || lower.contains("settings"))),
        _ => false,
    }
}

pub struct ConfigurationStep;

impl ExtractionStep for ConfigurationStep {
    fn metadata_type(&self) -> MetadataType {
        MetadataType::Configuration
    }

    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>> {
        let mut data = Map::new();
        let mut errors = FileErrors::default();
        let mut files = Vec::new();

        let dockerfiles = ctx.find_all(|n| n == "Dockerfile" || n.starts_with("Dockerfile."));
        if !dockerfiles.is_empty() {
            let mut parsed = Map::new();
            for file in dockerfiles {
                if let Some(value) = read_with(ctx, file, &mut errors, |t| Ok(parse_dockerfile(t))) {
                    parsed.insert(display(file), value);
                    files.push(display(file));
                }
            }
            data.insert("dockerfiles".into(), Value::Object(parsed));
        }

        let compose_files = ctx.find_all(|n| COMPOSE_NAMES.contains(&n));
        if !compose_files.is_empty() {
            let mut parsed = Map::new();
            for file in compose_files {
                if let Some(value) = read_with(ctx, file, &mut errors, parse_compose) {
                    parsed.insert(display(file), value);
                    files.push(display(file));
                }
            }
            data.insert("compose".into(), Value::Object(parsed));
        }

        let mut settings = Map::new();
        for file in ctx.files().iter().filter(|f| is_config_file(f)) {
            if let Some((format, keys)) = read_with(ctx, file, &mut errors, |t| top_level_keys(file, t)) {
                settings.insert(display(file), json!({"format": format, "keys": keys}));
                files.push(display(file));
            }
        }
        if !settings.is_empty() {
            data.insert("settings".into(), Value::Object(settings));
        }

        errors.attach(&mut data);
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            ExtractedMetadata::new(MetadataType::Configuration, 0.8, Value::Object(data))
                .with_files(files),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use beacon_types::{RawService, ServiceRecord, ServiceSource};
    use std::fs;

    #[test]
    fn test_parse_dockerfile() {
        let value = parse_dockerfile(
            "FROM node:20 AS build\nRUN npm ci\nFROM node:20-slim\nENV NODE_ENV=production PORT=3000\n\
             EXPOSE 3000/tcp 9229\nCMD [\"node\", \"index.js\"]\n",
        );
        assert_eq!(value["base_images"], json!(["node:20", "node:20-slim"]));
        assert_eq!(value["exposed_ports"], json!([3000, 9229]));
        assert_eq!(value["env_keys"], json!(["NODE_ENV", "PORT"]));
        assert_eq!(value["multi_stage"], true);
    }

    #[test]
    fn test_parse_compose_depends_on_forms() {
        let value = parse_compose(
            "services:\n  web:\n    build: .\n    ports: [\"8080:80\"]\n    depends_on: [db]\n  \
             db:\n    image: postgres:16\n    depends_on:\n      cache:\n        condition: service_started\n",
        )
        .unwrap();
        assert_eq!(value["services"]["web"]["depends_on"], json!(["db"]));
        assert_eq!(value["services"]["db"]["depends_on"], json!(["cache"]));
        assert_eq!(value["services"]["db"]["image"], "postgres:16");
    }

    #[test]
    fn test_bad_file_does_not_abort_step() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine\nEXPOSE 80\n").unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "services: [unclosed").unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config/app.yaml"), "server:\n  port: 80\nlogging: {}\n").unwrap();

        let record = ServiceRecord::from(
            RawService::new("svc", "docker", ServiceSource::Local).with_location(dir.path().to_string_lossy()),
        );
        let config = ExtractorConfig::default();
        let ctx = ServiceContext::new(&record, &config);
        let meta = ConfigurationStep.extract(&ctx).unwrap().unwrap();

        assert_eq!(meta.data["dockerfiles"]["Dockerfile"]["exposed_ports"], json!([80]));
        assert_eq!(meta.data["settings"]["config/app.yaml"]["keys"], json!(["server", "logging"]));
        assert_eq!(meta.data["errors"].as_array().unwrap().len(), 1);
        assert_eq!(meta.data["errors"][0]["file"], "docker-compose.yml");
    }
}
