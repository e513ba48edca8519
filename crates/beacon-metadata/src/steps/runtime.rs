//! Runtime versions, process declarations and live container state.

use beacon_types::{ExtractedMetadata, MetadataType};
use serde_json::{json, Map, Value};

use super::{read_with, ExtractionStep, FileErrors};
use crate::context::{display, ServiceContext};
use crate::error::MetadataResult;

/// Record metadata keys that describe live container or workload state.
const RUNTIME_KEYS: &[&str] = &[
    "container_id",
    "container_name",
    "image",
    "state",
    "pid",
    "created",
    "networks",
    "docker_health",
    "compose_project",
    "swarm_service_id",
    "mode",
    "replicas",
    "ready_replicas",
    "namespace",
    "uid",
];

/// Single-value version pin files.
const VERSION_FILES: &[(&str, &str)] = &[
    (".nvmrc", "node"),
    (".node-version", "node"),
    (".python-version", "python"),
    (".ruby-version", "ruby"),
    (".java-version", "java"),
    ("runtime.txt", "python"),
];

pub fn parse_tool_versions(text: &str) -> Map<String, Value> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            let tool = parts.next()?;
            let version = parts.next()?;
            let tool = if tool == "nodejs" { "node" } else { tool };
            Some((tool.to_string(), json!(version)))
        })
        .collect()
}

pub fn parse_procfile(text: &str) -> Map<String, Value> {
    text.lines()
        .filter_map(|l| l.split_once(':'))
        .filter(|(name, _)| {
            !name.trim().is_empty() && !name.trim_start().starts_with('#')
        })
        .map(|(name, command)| (name.trim().to_string(), json!(command.trim())))
        .collect()
}

fn go_directive(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("go "))
        .map(|v| v.trim().to_string())
}

fn rust_toolchain(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.contains('[') {
        return (!trimmed.is_empty()).then(|| trimmed.to_string());
    }
    let doc: toml::Table = trimmed.parse().ok()?;
    doc.get("toolchain")
        .and_then(|t| t.get("channel"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
}

pub struct RuntimeStep;

impl ExtractionStep for RuntimeStep {
    fn metadata_type(&self) -> MetadataType {
        MetadataType::Runtime
    }

    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>> {
        let record = ctx.record;
        let mut data = Map::new();
        let mut errors = FileErrors::default();
        let mut files = Vec::new();

        let live: Map<String, Value> = RUNTIME_KEYS
            .iter()
            .filter_map(|k| record.metadata.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        let from_runtime = !live.is_empty();
        if from_runtime {
            data.insert("container".into(), Value::Object(live));
        }

        let mut versions = Map::new();
        for (name, runtime) in VERSION_FILES {
            if let Some(file) = ctx.find(name) {
                if let Some(version) = read_with(ctx, file, &mut errors, |t| Ok(t.trim().to_string())) {
                    if !version.is_empty() {
                        versions.insert(runtime.to_string(), json!(version));
                        files.push(display(file));
                    }
                }
            }
        }
        if let Some(file) = ctx.find(".tool-versions") {
            if let Some(tools) = read_with(ctx, file, &mut errors, |t| Ok(parse_tool_versions(t))) {
                versions.extend(tools);
                files.push(display(file));
            }
        }
        if let Some(file) = ctx.find("go.mod") {
            if let Some(Some(version)) = read_with(ctx, file, &mut errors, |t| Ok(go_directive(t))) {
                versions.insert("go".into(), json!(version));
                files.push(display(file));
            }
        }
        let toolchain = ctx.find("rust-toolchain.toml").or_else(|| ctx.find("rust-toolchain"));
        if let Some(file) = toolchain {
            if let Some(Some(channel)) = read_with(ctx, file, &mut errors, |t| Ok(rust_toolchain(t))) {
                versions.insert("rust".into(), json!(channel));
                files.push(display(file));
            }
        }
        if let Some(engines) = record.metadata.get("engines").and_then(Value::as_object) {
            for (engine, version) in engines {
                versions.entry(engine.clone()).or_insert_with(|| version.clone());
            }
        }
        if !versions.is_empty() {
            data.insert("versions".into(), Value::Object(versions));
        }

        if let Some(file) = ctx.find("Procfile") {
            if let Some(processes) = read_with(ctx, file, &mut errors, |t| Ok(parse_procfile(t))) {
                data.insert("processes".into(), Value::Object(processes));
                files.push(display(file));
            }
        }

        if !record.endpoints.is_empty() {
            let listening: Vec<Value> = record
                .endpoints
                .iter()
                .map(|e| json!({"protocol": e.protocol, "host": e.host, "port": e.port, "scope": e.scope}))
                .collect();
            data.insert("listening".into(), Value::Array(listening));
        }

        errors.attach(&mut data);
        if data.is_empty() {
            return Ok(None);
        }
        let confidence = if from_runtime { 0.95 } else { 0.7 };
        Ok(Some(
            ExtractedMetadata::new(MetadataType::Runtime, confidence, Value::Object(data))
                .with_files(files),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use beacon_types::{Endpoint, RawService, ServiceRecord, ServiceSource};
    use std::fs;

    #[test]
    fn test_tool_versions_and_procfile() {
        let tools = parse_tool_versions("nodejs 20.11.0\n# comment\npython 3.12.1\n");
        assert_eq!(tools["node"], "20.11.0");
        assert_eq!(tools["python"], "3.12.1");

        let procs = parse_procfile("web: gunicorn app:app\nworker: celery -A tasks worker\n");
        assert_eq!(procs["web"], "gunicorn app:app");
        assert_eq!(procs.len(), 2);
    }

    #[test]
    fn test_rust_toolchain_forms() {
        assert_eq!(rust_toolchain("1.79.0\n").as_deref(), Some("1.79.0"));
        assert_eq!(
            rust_toolchain("[toolchain]\nchannel = \"stable\"\n").as_deref(),
            Some("stable")
        );
    }

    #[test]
    fn test_container_state_from_record() {
        let mut raw = RawService::new("web", "docker-service", ServiceSource::Docker);
        raw.metadata.insert("container_id".into(), json!("abc123"));
        raw.metadata.insert("image".into(), json!("nginx:1.25"));
        raw.endpoints.push(Endpoint::http("localhost", 8080));
        let record = ServiceRecord::from(raw);

        let config = ExtractorConfig::default();
        let ctx = ServiceContext::new(&record, &config);
        let meta = RuntimeStep.extract(&ctx).unwrap().unwrap();

        assert_eq!(meta.data["container"]["image"], "nginx:1.25");
        assert_eq!(meta.data["listening"][0]["port"], 8080);
        assert_eq!(meta.confidence, 0.95);
    }

    #[test]
    fn test_version_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".nvmrc"), "v20\n").unwrap();
        fs::write(dir.path().join("go.mod"), "module x\n\ngo 1.22\n").unwrap();
        let record = ServiceRecord::from(
            RawService::new("svc", "go", ServiceSource::Local).with_location(dir.path().to_string_lossy()),
        );
        let config = ExtractorConfig::default();
        let ctx = ServiceContext::new(&record, &config);
        let meta = RuntimeStep.extract(&ctx).unwrap().unwrap();
        assert_eq!(meta.data["versions"]["node"], "v20");
        assert_eq!(meta.data["versions"]["go"], "1.22");
    }
}
