//! API specification files and framework route declarations.

use std::path::Path;

use beacon_types::{ExtractedMetadata, MetadataType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::{read_with, ExtractionStep, FileErrors};
use crate::context::{display, ServiceContext};
use crate::error::MetadataResult;

const MAX_LISTED_PATHS: usize = 50;
const MAX_ROUTES: usize = 200;

/// (framework, regex); capture `method` and `path` where the syntax has them.
static ROUTE_RULES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "express",
            r#"\b(?:app|router)\.(?P<method>get|post|put|delete|patch)\(\s*['"`](?P<path>/[^'"`]*)"#,
        ),
        (
            "fastapi",
            r#"@(?:app|router)\.(?P<method>get|post|put|delete|patch)\(\s*['"](?P<path>/[^'"]*)"#,
        ),
        (
            "flask",
            r#"@(?:app|bp|blueprint|\w+_bp)\.route\(\s*['"](?P<path>/[^'"]*)"#,
        ),
        (
            "spring",
            r#"@(?P<method>Get|Post|Put|Delete|Patch|Request)Mapping\(\s*(?:value\s*=\s*|path\s*=\s*)?"(?P<path>/[^"]*)""#,
        ),
        (
            "gin",
            r#"\.(?P<method>GET|POST|PUT|DELETE|PATCH)\(\s*"(?P<path>/[^"]*)""#,
        ),
        (
            "axum",
            r#"\.route\(\s*"(?P<path>/[^"]*)"\s*,\s*(?P<method>get|post|put|delete|patch)"#,
        ),
    ]
    .into_iter()
    .map(|(framework, pattern)| (framework, Regex::new(pattern).expect("valid regex")))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub framework: &'static str,
    pub method: String,
    pub path: String,
}

pub fn scan_routes(text: &str) -> Vec<Route> {
    let mut routes = Vec::new();
    for (framework, pattern) in ROUTE_RULES.iter() {
        for caps in pattern.captures_iter(text) {
            let method = caps
                .name("method")
                .map(|m| m.as_str().to_ascii_uppercase())
                .map(|m| if m == "REQUEST" { "ANY".to_string() } else { m })
                .unwrap_or_else(|| "ANY".to_string());
            if let Some(path) = caps.name("path") {
                routes.push(Route {
                    framework,
                    method,
                    path: path.as_str().to_string(),
                });
            }
        }
    }
    routes
}

fn is_spec_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    (lower.starts_with("openapi") || lower.starts_with("swagger"))
        && (lower.ends_with(".json") || lower.ends_with(".yaml") || lower.ends_with(".yml"))
}

/// Summary of an OpenAPI / Swagger document.
pub fn parse_spec(file: &Path, text: &str) -> Result<Value, String> {
    let doc: Value = if file.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(text).map_err(|e| e.to_string())?
    } else {
        serde_yaml::from_str(text).map_err(|e| e.to_string())?
    };

    let version = doc
        .get("openapi")
        .or_else(|| doc.get("swagger"))
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| Some(v.to_string())))
        .ok_or_else(|| "missing openapi/swagger version field".to_string())?;

    let paths: Vec<String> = doc
        .get("paths")
        .and_then(Value::as_object)
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();
    let operations: usize = doc
        .get("paths")
        .and_then(Value::as_object)
        .map(|p| {
            p.values()
                .filter_map(Value::as_object)
                .map(|ops| {
                    ops.keys()
                        .filter(|k| {
                            matches!(
                                k.as_str(),
                                "get" | "post" | "put" | "delete" | "patch" | "head" | "options"
                            )
                        })
                        .count()
                })
                .sum()
        })
        .unwrap_or(0);

    Ok(json!({
        "spec_version": version,
        "title": doc.pointer("/info/title"),
        "api_version": doc.pointer("/info/version"),
        "path_count": paths.len(),
        "operation_count": operations,
        "paths": paths.into_iter().take(MAX_LISTED_PATHS).collect::<Vec<_>>(),
    }))
}

pub struct ApiStep;

impl ExtractionStep for ApiStep {
    fn metadata_type(&self) -> MetadataType {
        MetadataType::Api
    }

    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>> {
        let mut errors = FileErrors::default();
        let mut files = Vec::new();

        let mut specs = Map::new();
        for file in ctx.find_all(is_spec_file) {
            if let Some(summary) = read_with(ctx, file, &mut errors, |t| parse_spec(file, t)) {
                specs.insert(display(file), summary);
                files.push(display(file));
            }
        }

        let mut routes = Vec::new();
        for file in ctx.code_files() {
            if routes.len() >= MAX_ROUTES {
                break;
            }
            let Ok(text) = ctx.read(file) else { continue };
            let found = scan_routes(&text);
            if found.is_empty() {
                continue;
            }
            let name = display(file);
            files.push(name.clone());
            routes.extend(found.into_iter().map(|r| {
                json!({"method": r.method, "path": r.path, "framework": r.framework, "file": name})
            }));
        }
        routes.truncate(MAX_ROUTES);

        let mut data = Map::new();
        errors.attach(&mut data);
        if specs.is_empty() && routes.is_empty() && data.is_empty() {
            return Ok(None);
        }

        let confidence = if specs.is_empty() { 0.6 } else { 0.95 };
        data.insert("specs".into(), Value::Object(specs));
        data.insert("routes".into(), Value::Array(routes));
        Ok(Some(
            ExtractedMetadata::new(MetadataType::Api, confidence, Value::Object(data))
                .with_files(files),
        ))
    }
}
