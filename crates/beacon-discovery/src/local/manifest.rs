//! Best-effort parsing of ecosystem manifests found by the scanner.

use std::fs;
use std::path::Path;

use beacon_types::Metadata;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

/// Facts pulled from the manifests of one directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    /// Declared package dependencies (libraries, not services).
    pub dependencies: Vec<String>,
    pub frameworks: Vec<String>,
    pub port: Option<u16>,
    /// Type-specific extras copied into the service metadata.
    pub fields: Metadata,
}

const FRAMEWORKS: &[(&str, &str)] = &[
    ("express", "express"),
    ("fastify", "fastify"),
    ("koa", "koa"),
    ("@nestjs/core", "nestjs"),
    ("next", "next"),
    ("@hapi/hapi", "hapi"),
    ("flask", "flask"),
    ("django", "django"),
    ("fastapi", "fastapi"),
    ("aiohttp", "aiohttp"),
    ("tornado", "tornado"),
    ("actix-web", "actix-web"),
    ("axum", "axum"),
    ("rocket", "rocket"),
    ("warp", "warp"),
    ("github.com/gin-gonic/gin", "gin"),
    ("github.com/labstack/echo", "echo"),
    ("github.com/gofiber/fiber", "fiber"),
    ("spring-boot-starter-web", "spring-boot"),
    ("spring-boot-starter", "spring-boot"),
    ("quarkus-resteasy", "quarkus"),
    ("micronaut-http-server", "micronaut"),
];

static SCRIPT_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:PORT=|--port[= ]|-p )(\d{2,5})").expect("valid regex"));
static REQUIREMENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._\-]*)").expect("valid regex"));
static SETUP_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"name\s*=\s*['"]([^'"]+)['"]"#).expect("valid regex"));
static SETUP_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"version\s*=\s*['"]([^'"]+)['"]"#).expect("valid regex"));
static POM_PARENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<parent>.*?</parent>").expect("valid regex"));
static POM_DEPENDENCIES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<dependencies>.*?</dependencies>").expect("valid regex"));
static XML_ARTIFACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<artifactId>\s*([^<\s]+)\s*</artifactId>").expect("valid regex"));
static XML_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<version>\s*([^<\s]+)\s*</version>").expect("valid regex"));
static XML_DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<description>\s*(.*?)\s*</description>").expect("valid regex"));
static GRADLE_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:implementation|api|compile|runtimeOnly)\s*\(?\s*['"]([^:'"]+):([^:'"]+)"#)
        .expect("valid regex")
});
static GRADLE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*version\s*=\s*['"]([^'"]+)['"]"#).expect("valid regex"));

/// Parse the manifests relevant to `service_type` in `dir`.
///
/// Unreadable or malformed files are skipped.
pub fn parse_manifests(service_type: &str, dir: &Path, file_names: &[String]) -> ManifestInfo {
    let mut info = ManifestInfo::default();
    let read = |name: &str| -> Option<String> {
        if !file_names.iter().any(|f| f == name) {
            return None;
        }
        match fs::read_to_string(dir.join(name)) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(file = %dir.join(name).display(), error = %e, "Skipping unreadable manifest");
                None
            }
        }
    };

    match service_type {
        "node" => {
            if let Some(text) = read("package.json") {
                parse_package_json(&text, &mut info);
            }
        }
        "python" => {
            if let Some(text) = read("pyproject.toml") {
                parse_pyproject(&text, &mut info);
            }
            if let Some(text) = read("requirements.txt") {
                info.dependencies.extend(parse_requirements(&text));
            }
            if let Some(text) = read("Pipfile") {
                parse_pipfile(&text, &mut info);
            }
            if let Some(text) = read("setup.py") {
                if info.name.is_none() {
                    info.name = capture(&SETUP_NAME, &text);
                }
                if info.version.is_none() {
                    info.version = capture(&SETUP_VERSION, &text);
                }
            }
        }
        "docker" => {
            let dockerfile = file_names
                .iter()
                .find(|f| f.as_str() == "Dockerfile" || f.ends_with(".dockerfile"));
            if let Some(name) = dockerfile {
                if let Some(text) = read(name.as_str()) {
                    parse_dockerfile(&text, &mut info);
                    info.fields.insert("dockerfile".into(), json!(name));
                }
            }
        }
        "systemd" => {
            if let Some(unit) = file_names.iter().find(|f| f.ends_with(".service")) {
                if let Some(text) = read(unit.as_str()) {
                    info.name = unit.strip_suffix(".service").map(str::to_string);
                    parse_unit_file(&text, &mut info);
                }
            }
        }
        "mcp" => {
            if let Some(text) = read("mcp.json") {
                parse_mcp_json(&text, &mut info);
            }
            if let Some(text) = read("package.json") {
                let mut package = ManifestInfo::default();
                parse_package_json(&text, &mut package);
                merge_missing(&mut info, package);
            }
        }
        "go" => {
            if let Some(text) = read("go.mod") {
                parse_go_mod(&text, &mut info);
            }
        }
        "rust" => {
            if let Some(text) = read("Cargo.toml") {
                parse_cargo_toml(&text, &mut info);
            }
        }
        "java" => {
            if let Some(text) = read("pom.xml") {
                parse_pom(&text, &mut info);
            } else if let Some(text) = read("build.gradle").or_else(|| read("build.gradle.kts")) {
                parse_gradle(&text, &mut info);
            }
        }
        _ => {}
    }

    info.frameworks = detect_frameworks(&info.dependencies);
    info
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn merge_missing(info: &mut ManifestInfo, other: ManifestInfo) {
    if info.name.is_none() {
        info.name = other.name;
    }
    if info.version.is_none() {
        info.version = other.version;
    }
    if info.description.is_none() {
        info.description = other.description;
    }
    if info.port.is_none() {
        info.port = other.port;
    }
    info.dependencies.extend(other.dependencies);
    for (k, v) in other.fields {
        info.fields.entry(k).or_insert(v);
    }
}

pub fn detect_frameworks(dependencies: &[String]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for dep in dependencies {
        let dep = dep.to_ascii_lowercase();
        for (needle, framework) in FRAMEWORKS {
            let matches = dep == *needle || dep.starts_with(&format!("{}/", needle));
            if matches && !found.iter().any(|f| f == framework) {
                found.push(framework.to_string());
            }
        }
    }
    found
}

fn object_keys(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_object())
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default()
}

fn parse_package_json(text: &str, info: &mut ManifestInfo) {
    let Ok(package) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let string = |key: &str| package.get(key).and_then(|v| v.as_str()).map(str::to_string);

    info.name = string("name");
    info.version = string("version");
    info.description = string("description");
    info.dependencies = object_keys(package.get("dependencies"));

    for key in ["main", "scripts", "engines", "bin"] {
        if let Some(value) = package.get(key) {
            info.fields.insert(key.to_string(), value.clone());
        }
    }
    let dev = object_keys(package.get("devDependencies"));
    if !dev.is_empty() {
        info.fields.insert("dev_dependencies".into(), json!(dev));
    }

    if let Some(scripts) = package.get("scripts").and_then(|s| s.as_object()) {
        info.port = scripts
            .values()
            .filter_map(|v| v.as_str())
            .find_map(|script| capture(&SCRIPT_PORT, script).and_then(|p| p.parse().ok()));
    }
}

fn toml_str(value: &toml::Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}

fn requirement_name(spec: &str) -> Option<String> {
    capture(&REQUIREMENT_NAME, spec)
}

fn parse_pyproject(text: &str, info: &mut ManifestInfo) {
    let Ok(doc) = text.parse::<toml::Value>() else {
        return;
    };

    if doc.get("project").is_some() {
        info.name = toml_str(&doc, &["project", "name"]);
        info.version = toml_str(&doc, &["project", "version"]);
        info.description = toml_str(&doc, &["project", "description"]);
        if let Some(deps) = doc
            .get("project")
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_array())
        {
            info.dependencies
                .extend(deps.iter().filter_map(|d| d.as_str()).filter_map(requirement_name));
        }
    } else if doc.get("tool").and_then(|t| t.get("poetry")).is_some() {
        info.name = toml_str(&doc, &["tool", "poetry", "name"]);
        info.version = toml_str(&doc, &["tool", "poetry", "version"]);
        info.description = toml_str(&doc, &["tool", "poetry", "description"]);
        if let Some(deps) = doc
            .get("tool")
            .and_then(|t| t.get("poetry"))
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_table())
        {
            info.dependencies
                .extend(deps.keys().filter(|k| k.as_str() != "python").cloned());
        }
    }
}

pub fn parse_requirements(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(requirement_name)
        .collect()
}

fn parse_pipfile(text: &str, info: &mut ManifestInfo) {
    let Ok(doc) = text.parse::<toml::Value>() else {
        return;
    };
    if let Some(packages) = doc.get("packages").and_then(|p| p.as_table()) {
        info.dependencies.extend(packages.keys().cloned());
    }
}

fn parse_dockerfile(text: &str, info: &mut ManifestInfo) {
    let mut exposed: Vec<u16> = Vec::new();
    let mut has_healthcheck = false;

    for line in text.lines().map(str::trim) {
        let mut parts = line.splitn(2, char::is_whitespace);
        let instruction = parts.next().unwrap_or("").to_ascii_uppercase();
        let rest = parts.next().unwrap_or("").trim();
        match instruction.as_str() {
            "FROM" => {
                info.fields
                    .entry("base_image")
                    .or_insert_with(|| json!(rest.split_whitespace().next().unwrap_or(rest)));
            }
            "EXPOSE" => {
                exposed.extend(
                    rest.split_whitespace()
                        .filter_map(|p| p.split('/').next())
                        .filter_map(|p| p.parse::<u16>().ok()),
                );
            }
            "HEALTHCHECK" => has_healthcheck = !rest.eq_ignore_ascii_case("NONE"),
            "CMD" | "ENTRYPOINT" => {
                info.fields
                    .insert(instruction.to_ascii_lowercase(), json!(rest));
            }
            _ => {}
        }
    }

    info.port = exposed.first().copied();
    if !exposed.is_empty() {
        info.fields.insert("exposed_ports".into(), json!(exposed));
    }
    info.fields.insert("has_healthcheck".into(), json!(has_healthcheck));
}

fn parse_unit_file(text: &str, info: &mut ManifestInfo) {
    for line in text.lines().map(str::trim) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Description" => info.description = Some(value.to_string()),
            "ExecStart" => {
                info.fields.insert("exec_start".into(), json!(value));
                let binary = value
                    .trim_start_matches(['-', '@', '+', '!'])
                    .split_whitespace()
                    .next()
                    .and_then(|b| Path::new(b).file_name())
                    .and_then(|b| b.to_str());
                if let Some(binary) = binary {
                    info.fields.insert("process_name".into(), json!(binary));
                }
            }
            "User" => {
                info.fields.insert("user".into(), json!(value));
            }
            "WorkingDirectory" => {
                info.fields.insert("working_directory".into(), json!(value));
            }
            _ => {}
        }
    }
}

fn parse_mcp_json(text: &str, info: &mut ManifestInfo) {
    let Ok(manifest) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let string = |key: &str| manifest.get(key).and_then(|v| v.as_str()).map(str::to_string);
    info.name = string("name");
    info.version = string("version");
    info.description = string("description");

    if let Some(tools) = manifest.get("tools").and_then(|t| t.as_array()) {
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
            .collect();
        info.fields.insert("tools".into(), json!(names));
    }
    for key in ["command", "args", "transport"] {
        if let Some(value) = manifest.get(key) {
            info.fields.insert(key.to_string(), value.clone());
        }
    }
}

fn parse_go_mod(text: &str, info: &mut ManifestInfo) {
    let mut in_require = false;
    for line in text.lines().map(str::trim) {
        if let Some(module) = line.strip_prefix("module ") {
            let module = module.trim();
            info.fields.insert("module".into(), json!(module));
            info.name = module.rsplit('/').next().map(str::to_string);
        } else if let Some(version) = line.strip_prefix("go ") {
            info.fields.insert("go_version".into(), json!(version.trim()));
        } else if line.starts_with("require (") {
            in_require = true;
        } else if in_require && line == ")" {
            in_require = false;
        } else if let Some(dep) = line.strip_prefix("require ") {
            if let Some(path) = dep.split_whitespace().next() {
                info.dependencies.push(path.to_string());
            }
        } else if in_require {
            if let Some(path) = line.split_whitespace().next() {
                if !path.starts_with("//") {
                    info.dependencies.push(path.to_string());
                }
            }
        }
    }
}

fn parse_cargo_toml(text: &str, info: &mut ManifestInfo) {
    let Ok(doc) = text.parse::<toml::Value>() else {
        return;
    };
    info.name = toml_str(&doc, &["package", "name"]);
    info.version = toml_str(&doc, &["package", "version"]);
    info.description = toml_str(&doc, &["package", "description"]);
    if let Some(deps) = doc.get("dependencies").and_then(|d| d.as_table()) {
        info.dependencies.extend(deps.keys().cloned());
    }
    if doc.get("workspace").is_some() {
        info.fields.insert("workspace".into(), json!(true));
    }
}

fn parse_pom(text: &str, info: &mut ManifestInfo) {
    let without_parent = POM_PARENT.replace(text, "");
    let project_section = POM_DEPENDENCIES.replace_all(&without_parent, "");

    info.name = capture(&XML_ARTIFACT, &project_section);
    info.version = capture(&XML_VERSION, &project_section);
    info.description = capture(&XML_DESCRIPTION, &project_section);

    if let Some(deps) = POM_DEPENDENCIES.find(&without_parent) {
        info.dependencies.extend(
            XML_ARTIFACT
                .captures_iter(deps.as_str())
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        );
    }
    info.fields.insert("build_tool".into(), json!("maven"));
}

fn parse_gradle(text: &str, info: &mut ManifestInfo) {
    info.version = capture(&GRADLE_VERSION, text);
    info.dependencies.extend(
        GRADLE_DEPENDENCY
            .captures_iter(text)
            .filter_map(|c| c.get(2))
            .map(|m| m.as_str().to_string()),
    );
    info.fields.insert("build_tool".into(), json!("gradle"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_json() {
        let mut info = ManifestInfo::default();
        parse_package_json(
            r#"{"name":"svc-a","version":"1.2.0","main":"index.js",
                "scripts":{"start":"PORT=4000 node index.js"},
                "dependencies":{"express":"^4.18.0"}}"#,
            &mut info,
        );
        assert_eq!(info.name.as_deref(), Some("svc-a"));
        assert_eq!(info.port, Some(4000));
        assert_eq!(info.fields["main"], "index.js");
        assert_eq!(detect_frameworks(&info.dependencies), vec!["express"]);
    }

    #[test]
    fn test_pyproject_and_requirements() {
        let mut info = ManifestInfo::default();
        parse_pyproject(
            r#"
            [project]
            name = "billing"
            version = "0.3.1"
            dependencies = ["fastapi>=0.100", "uvicorn[standard]"]
            "#,
            &mut info,
        );
        assert_eq!(info.name.as_deref(), Some("billing"));
        assert_eq!(info.dependencies, vec!["fastapi", "uvicorn"]);

        let reqs = parse_requirements("# comment\nflask==2.0\n-r base.txt\nrequests>=2\n");
        assert_eq!(reqs, vec!["flask", "requests"]);
    }

    #[test]
    fn test_dockerfile() {
        let mut info = ManifestInfo::default();
        parse_dockerfile(
            "FROM node:20-alpine AS build\nEXPOSE 8080/tcp 9090\nHEALTHCHECK CMD curl -f http://localhost:8080/health\nCMD [\"node\", \"server.js\"]\n",
            &mut info,
        );
        assert_eq!(info.port, Some(8080));
        assert_eq!(info.fields["exposed_ports"], json!([8080, 9090]));
        assert_eq!(info.fields["base_image"], "node:20-alpine");
        assert_eq!(info.fields["has_healthcheck"], true);
    }

    #[test]
    fn test_unit_file_sets_process_name() {
        let mut info = ManifestInfo::default();
        parse_unit_file(
            "[Unit]\nDescription=Queue worker\n[Service]\nExecStart=/usr/bin/qworker --threads 4\nUser=svc\n",
            &mut info,
        );
        assert_eq!(info.description.as_deref(), Some("Queue worker"));
        assert_eq!(info.fields["process_name"], "qworker");
    }

    #[test]
    fn test_go_mod() {
        let mut info = ManifestInfo::default();
        parse_go_mod(
            "module github.com/acme/orders\n\ngo 1.21\n\nrequire (\n\tgithub.com/gin-gonic/gin v1.9.1\n)\n",
            &mut info,
        );
        assert_eq!(info.name.as_deref(), Some("orders"));
        assert_eq!(detect_frameworks(&info.dependencies), vec!["gin"]);
    }

    #[test]
    fn test_pom_skips_parent_artifact() {
        let mut info = ManifestInfo::default();
        parse_pom(
            r#"<project>
                <parent><artifactId>spring-boot-starter-parent</artifactId><version>3.1.0</version></parent>
                <artifactId>inventory</artifactId>
                <version>2.0.0</version>
                <dependencies>
                  <dependency><artifactId>spring-boot-starter-web</artifactId></dependency>
                </dependencies>
              </project>"#,
            &mut info,
        );
        assert_eq!(info.name.as_deref(), Some("inventory"));
        assert_eq!(info.version.as_deref(), Some("2.0.0"));
        assert_eq!(detect_frameworks(&info.dependencies), vec!["spring-boot"]);
    }

    #[test]
    fn test_malformed_manifest_is_ignored() {
        let mut info = ManifestInfo::default();
        parse_package_json("{not json", &mut info);
        assert!(info.name.is_none());
    }
}
