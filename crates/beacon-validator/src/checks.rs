//! The five static checks run on every record.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use beacon_types::ServiceRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{ValidatorError, ValidatorResult};
use crate::rules::{fields_for, DOCKER_TYPES, WEB_TYPES};

static SERVICE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

static LOOSE_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?\d+(\.\d+){0,2}([-+][0-9A-Za-z.-]+)?$").expect("valid regex")
});

static HOST_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,62}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,62}[A-Za-z0-9])?)*$")
        .expect("valid regex")
});

/// Issues and warnings collected by one or more checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl Findings {
    pub fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn extend(&mut self, other: Findings) {
        self.issues.extend(other.issues);
        self.warnings.extend(other.warnings);
    }
}

fn is_present(value: Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

fn metadata_strings<'a>(record: &'a ServiceRecord, key: &str) -> Vec<&'a str> {
    record
        .metadata
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Metadata keys whose value type is fixed.
const TYPED_FIELDS: &[(&str, &str)] = &[
    ("version", "string"),
    ("description", "string"),
    ("main", "string"),
    ("health_endpoint", "string"),
    ("frameworks", "list"),
    ("manifest_files", "list"),
    ("exposed_ports", "list"),
];

fn has_kind(value: &Value, kind: &str) -> bool {
    match kind {
        "string" => value.is_string(),
        "list" => value.is_array(),
        _ => true,
    }
}

/// Required base fields are present and typed as expected.
pub fn check_structure(record: &ServiceRecord) -> Findings {
    let mut findings = Findings::default();

    for (field, value) in [
        ("id", &record.id),
        ("name", &record.name),
        ("type", &record.service_type),
    ] {
        if value.trim().is_empty() {
            findings.issue(format!("Missing required field: {}", field));
        }
    }
    if record.source.is_filesystem_backed() && record.location.is_none() {
        findings.issue("Missing required field: location");
    }

    for (key, kind) in TYPED_FIELDS {
        if let Some(value) = record.metadata.get(*key) {
            if !value.is_null() && !has_kind(value, kind) {
                findings.issue(format!("Field '{}' must be a {}", key, kind));
            }
        }
    }
    findings
}

fn is_web_service(record: &ServiceRecord) -> bool {
    WEB_TYPES.contains(&record.service_type.as_str())
        || !metadata_strings(record, "frameworks").is_empty()
}

fn has_docker_build_reference(record: &ServiceRecord) -> bool {
    if ["dockerfile", "compose_file", "build_context", "compose_project"]
        .iter()
        .any(|key| is_present(record.metadata.get(*key).cloned()))
    {
        return true;
    }
    metadata_strings(record, "manifest_files").iter().any(|file| {
        let file = file.to_ascii_lowercase();
        file.starts_with("dockerfile") || file.contains("compose.y")
    })
}

pub fn is_valid_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    !host.is_empty() && (host.parse::<IpAddr>().is_ok() || HOST_NAME.is_match(host))
}

fn port_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Per-type field tables plus the Docker and web rules.
pub fn check_type_fields(record: &ServiceRecord) -> Findings {
    let mut findings = Findings::default();
    let service_type = record.service_type.as_str();

    if let Some(table) = fields_for(service_type) {
        for field in table.required {
            if !is_present(record.field(field)) {
                findings.issue(format!(
                    "Missing required field for {} service: {}",
                    service_type, field
                ));
            }
        }
        for field in table.recommended {
            if !is_present(record.field(field)) {
                findings.warn(format!(
                    "Missing recommended field for {} service: {}",
                    service_type, field
                ));
            }
        }
    }

    if DOCKER_TYPES.contains(&service_type) {
        let has_ports = !record.endpoints.is_empty()
            || is_present(record.metadata.get("exposed_ports").cloned());
        if !has_ports && !has_docker_build_reference(record) {
            findings.issue(
                "Docker service declares no exposed ports and no Dockerfile or docker-compose file",
            );
        }
    }

    if is_web_service(record) {
        for endpoint in &record.endpoints {
            if !is_valid_host(&endpoint.host) {
                findings.issue(format!("Invalid host for web service: '{}'", endpoint.host));
            }
            match endpoint.port {
                Some(0) => findings.issue(format!("Invalid port for web service: 0 on {}", endpoint.host)),
                Some(_) => {}
                None => findings.warn(format!("Web endpoint on {} has no port", endpoint.host)),
            }
        }
        if let Some(port) = record.metadata.get("port") {
            match port_value(port) {
                Some(p) if (1..=65535).contains(&p) => {}
                _ => findings.issue(format!("Invalid port for web service: {}", port)),
            }
        }
        if let Some(host) = record.metadata.get("host").and_then(Value::as_str) {
            if !is_valid_host(host) {
                findings.issue(format!("Invalid host for web service: '{}'", host));
            }
        }
    }
    findings
}

pub fn is_loose_semver(version: &str) -> bool {
    let trimmed = version.trim();
    semver::Version::parse(trimmed.trim_start_matches('v')).is_ok() || LOOSE_VERSION.is_match(trimmed)
}

/// Naming, versioning and location checks.
pub fn check_configuration(record: &ServiceRecord) -> Findings {
    let mut findings = Findings::default();

    if !record.name.is_empty() && !SERVICE_NAME.is_match(&record.name) {
        findings.warn(format!(
            "Service name '{}' contains characters outside [A-Za-z0-9_-]",
            record.name
        ));
    }

    if let Some(Value::String(version)) = record.field("version") {
        if !is_loose_semver(&version) {
            findings.warn(format!("Version '{}' does not follow semantic versioning", version));
        }
    }

    if let Some(location) = &record.location {
        if !Path::new(location).exists() {
            findings.issue(format!("Location does not exist: {}", location));
        }
    }
    findings
}

/// Matches metadata keys and values that look like secrets.
#[derive(Debug, Clone)]
pub struct SensitiveMatcher {
    terms: HashSet<String>,
    patterns: Vec<Regex>,
}

impl SensitiveMatcher {
    pub fn new(terms: &[String], patterns: &[String]) -> ValidatorResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ValidatorError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<ValidatorResult<Vec<_>>>()?;
        Ok(Self {
            terms: terms.iter().map(|t| t.to_ascii_lowercase()).collect(),
            patterns,
        })
    }

    /// Whether any word of `key` is a sensitive term. Words split on
    /// punctuation and camelCase boundaries, so `apiKey` and `DB_PASSWORD`
    /// match while `keywords` does not.
    pub fn key_is_sensitive(&self, key: &str) -> bool {
        key_words(key).iter().any(|w| self.terms.contains(w))
    }

    pub fn value_is_sensitive(&self, value: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(value))
    }

    fn scan(&self, value: &Value, path: &str, findings: &mut Findings) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    if self.key_is_sensitive(key) {
                        findings.warn(format!("Potentially sensitive field in metadata: {}", child_path));
                    }
                    self.scan(child, &child_path, findings);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    self.scan(child, &format!("{}[{}]", path, i), findings);
                }
            }
            Value::String(s) if self.value_is_sensitive(s) => {
                findings.warn(format!("Potentially sensitive value in metadata: {}", path));
            }
            _ => {}
        }
    }
}

fn key_words(key: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in key.chars() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Sensitive metadata and all-interface bindings; findings are warnings.
pub fn check_security(record: &ServiceRecord, matcher: &SensitiveMatcher) -> Findings {
    let mut findings = Findings::default();
    for (key, value) in &record.metadata {
        if matcher.key_is_sensitive(key) {
            findings.warn(format!("Potentially sensitive field in metadata: {}", key));
        }
        matcher.scan(value, key, &mut findings);
    }

    let meta_host_all = record
        .metadata
        .get("host")
        .and_then(Value::as_str)
        .map(|h| matches!(h, "0.0.0.0" | "::" | "[::]"))
        .unwrap_or(false);
    if meta_host_all || record.endpoints.iter().any(|e| e.binds_all_interfaces()) {
        findings.warn("Service binds to all interfaces (0.0.0.0)");
    }
    findings
}

/// Dependency list shape and self-dependency.
pub fn check_dependencies(record: &ServiceRecord) -> Findings {
    let mut findings = Findings::default();

    let mut seen = HashSet::new();
    for dep in &record.dependencies {
        if dep.trim().is_empty() {
            findings.issue("Dependency entries must be non-empty strings");
            continue;
        }
        if *dep == record.id || *dep == record.name {
            findings.issue(format!("Service '{}' depends on itself", record.name));
        }
        if !seen.insert(dep.as_str()) {
            findings.warn(format!("Duplicate dependency: {}", dep));
        }
    }

    if let Some(value) = record.metadata.get("dependencies") {
        let well_formed = value
            .as_array()
            .map(|items| items.iter().all(Value::is_string))
            .unwrap_or(false);
        if !well_formed {
            findings.issue("Field 'dependencies' must be a list of strings");
        }
    }
    findings
}
