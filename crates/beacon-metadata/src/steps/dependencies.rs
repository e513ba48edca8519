//! Declared dependencies across ecosystems.

use std::collections::BTreeMap;

use beacon_types::{ExtractedMetadata, MetadataType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::{read_with, ExtractionStep, FileErrors};
use crate::context::{display, ServiceContext};
use crate::error::MetadataResult;

/// name -> version requirement ("*" when unspecified)
pub type DependencyMap = BTreeMap<String, String>;

/// Runtime and development dependencies of one ecosystem.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Declared {
    pub runtime: DependencyMap,
    pub dev: DependencyMap,
}

impl Declared {
    fn len(&self) -> usize {
        self.runtime.len() + self.dev.len()
    }

    fn to_json(&self) -> Value {
        json!({"runtime": self.runtime, "dev": self.dev})
    }

    fn merge(&mut self, other: Declared) {
        self.runtime.extend(other.runtime);
        self.dev.extend(other.dev);
    }
}

const FRAMEWORKS: &[(&str, &str)] = &[
    ("express", "express"),
    ("fastify", "fastify"),
    ("koa", "koa"),
    ("@nestjs/core", "nestjs"),
    ("next", "next"),
    ("react", "react"),
    ("vue", "vue"),
    ("flask", "flask"),
    ("django", "django"),
    ("fastapi", "fastapi"),
    ("aiohttp", "aiohttp"),
    ("celery", "celery"),
    ("actix-web", "actix-web"),
    ("axum", "axum"),
    ("rocket", "rocket"),
    ("tokio", "tokio"),
    ("github.com/gin-gonic/gin", "gin"),
    ("github.com/labstack/echo/v4", "echo"),
    ("github.com/gofiber/fiber/v2", "fiber"),
    ("org.springframework.boot:spring-boot-starter-web", "spring-boot"),
    ("io.quarkus:quarkus-resteasy", "quarkus"),
];

static REQUIREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)(\[[^\]]*\])?\s*(.*?)\s*(;.*)?$").expect("valid regex")
});

static POM_DEPENDENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<dependency>(.*?)</dependency>").expect("valid regex"));

static XML_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(groupId|artifactId|version|scope)>\s*([^<\s]+)\s*</").expect("valid regex")
});

static GRADLE_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^\s*(implementation|api|compile|compileOnly|runtimeOnly|testImplementation|testCompile)\s*\(?\s*['"]([^:'"]+):([^:'"]+)(?::([^'"]+))?['"]"#,
    )
    .expect("valid regex")
});

fn version_or_star(spec: &str) -> String {
    let spec = spec.trim();
    if spec.is_empty() {
        "*".to_string()
    } else {
        spec.to_string()
    }
}

fn string_map(value: Option<&Value>) -> DependencyMap {
    value
        .and_then(Value::as_object)
        .map(|o| {
            o.iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(version_or_star).unwrap_or_else(|| "*".into())))
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_package_json(text: &str) -> Result<Declared, String> {
    let doc: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let mut runtime = string_map(doc.get("dependencies"));
    runtime.extend(string_map(doc.get("peerDependencies")));
    Ok(Declared {
        runtime,
        dev: string_map(doc.get("devDependencies")),
    })
}

/// One PEP 508 requirement line; `None` for comments, options and blanks.
pub fn parse_requirement(line: &str) -> Option<(String, String)> {
    let line = line.split(" #").next().unwrap_or("").trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
        return None;
    }
    let caps = REQUIREMENT.captures(line)?;
    let name = caps.get(1)?.as_str().to_lowercase();
    let spec = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    Some((name, version_or_star(spec)))
}

pub fn parse_requirements(text: &str) -> Declared {
    Declared {
        runtime: text.lines().filter_map(parse_requirement).collect(),
        dev: DependencyMap::new(),
    }
}

fn toml_version(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => version_or_star(s),
        toml::Value::Table(t) => t
            .get("version")
            .and_then(|v| v.as_str())
            .map(version_or_star)
            .or_else(|| t.get("path").map(|_| "path".to_string()))
            .or_else(|| t.get("git").map(|_| "git".to_string()))
            .unwrap_or_else(|| "*".to_string()),
        _ => "*".to_string(),
    }
}

fn toml_table(doc: &toml::Table, path: &[&str]) -> DependencyMap {
    let mut current = doc;
    for key in path {
        match current.get(*key).and_then(|v| v.as_table()) {
            Some(table) => current = table,
            None => return DependencyMap::new(),
        }
    }
    current
        .iter()
        .map(|(k, v)| (k.clone(), toml_version(v)))
        .collect()
}

pub fn parse_pipfile(text: &str) -> Result<Declared, String> {
    let doc: toml::Table = text.parse().map_err(|e: toml::de::Error| e.to_string())?;
    Ok(Declared {
        runtime: toml_table(&doc, &["packages"]),
        dev: toml_table(&doc, &["dev-packages"]),
    })
}

pub fn parse_pyproject(text: &str) -> Result<Declared, String> {
    let doc: toml::Table = text.parse().map_err(|e: toml::de::Error| e.to_string())?;
    let mut declared = Declared::default();

    if let Some(items) = doc
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    {
        declared.runtime.extend(
            items
                .iter()
                .filter_map(|i| i.as_str())
                .filter_map(parse_requirement),
        );
    }
    if let Some(groups) = doc
        .get("project")
        .and_then(|p| p.get("optional-dependencies"))
        .and_then(|d| d.as_table())
    {
        for items in groups.values().filter_map(|v| v.as_array()) {
            declared.dev.extend(
                items
                    .iter()
                    .filter_map(|i| i.as_str())
                    .filter_map(parse_requirement),
            );
        }
    }

    declared
        .runtime
        .extend(toml_table(&doc, &["tool", "poetry", "dependencies"]));
    declared.runtime.remove("python");
    declared
        .dev
        .extend(toml_table(&doc, &["tool", "poetry", "dev-dependencies"]));
    declared
        .dev
        .extend(toml_table(&doc, &["tool", "poetry", "group", "dev", "dependencies"]));
    Ok(declared)
}

pub fn parse_go_mod(text: &str) -> Declared {
    let mut declared = Declared::default();
    let mut in_block = false;
    for line in text.lines() {
        let line = line.trim();
        let entry = if in_block {
            if line.starts_with(')') {
                in_block = false;
                continue;
            }
            line
        } else if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest.starts_with('(') {
                in_block = true;
                continue;
            }
            rest
        } else {
            continue;
        };

        let indirect = entry.contains("// indirect");
        let entry = entry.split("//").next().unwrap_or("").trim();
        let mut parts = entry.split_whitespace();
        if let (Some(module), Some(version)) = (parts.next(), parts.next()) {
            let target = if indirect { &mut declared.dev } else { &mut declared.runtime };
            target.insert(module.to_string(), version.to_string());
        }
    }
    declared
}

pub fn parse_cargo_toml(text: &str) -> Result<Declared, String> {
    let doc: toml::Table = text.parse().map_err(|e: toml::de::Error| e.to_string())?;
    let mut runtime = toml_table(&doc, &["dependencies"]);
    runtime.extend(toml_table(&doc, &["workspace", "dependencies"]));
    let mut dev = toml_table(&doc, &["dev-dependencies"]);
    dev.extend(toml_table(&doc, &["build-dependencies"]));
    Ok(Declared { runtime, dev })
}

pub fn parse_pom(text: &str) -> Declared {
    let mut declared = Declared::default();
    for block in POM_DEPENDENCY.captures_iter(text) {
        let mut fields = BTreeMap::new();
        for field in XML_FIELD.captures_iter(&block[1]) {
            fields.insert(field[1].to_string(), field[2].to_string());
        }
        let (Some(group), Some(artifact)) = (fields.get("groupId"), fields.get("artifactId")) else {
            continue;
        };
        let name = format!("{}:{}", group, artifact);
        let version = fields.get("version").cloned().unwrap_or_else(|| "*".into());
        match fields.get("scope").map(String::as_str) {
            Some("test") | Some("provided") => declared.dev.insert(name, version),
            _ => declared.runtime.insert(name, version),
        };
    }
    declared
}

pub fn parse_gradle(text: &str) -> Declared {
    let mut declared = Declared::default();
    for caps in GRADLE_DEPENDENCY.captures_iter(text) {
        let name = format!("{}:{}", &caps[2], &caps[3]);
        let version = caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_else(|| "*".into());
        if caps[1].starts_with("test") || &caps[1] == "compileOnly" {
            declared.dev.insert(name, version);
        } else {
            declared.runtime.insert(name, version);
        }
    }
    declared
}

/// Frameworks recognized among runtime dependency names.
pub fn detect_frameworks<'a>(names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut found = Vec::new();
    for name in names {
        let lower = name.to_ascii_lowercase();
        for (needle, framework) in FRAMEWORKS {
            if lower == *needle && !found.iter().any(|f: &String| f == framework) {
                found.push(framework.to_string());
            }
        }
    }
    found
}

type Parser = fn(&str) -> Result<Declared, String>;

fn parsers() -> [(&'static str, fn(&str) -> bool, Parser); 8] {
    [
        ("npm", |n| n == "package.json", parse_package_json),
        ("pypi", |n| n.starts_with("requirements") && n.ends_with(".txt"), |t| Ok(parse_requirements(t))),
        ("pypi", |n| n == "Pipfile", parse_pipfile),
        ("pypi", |n| n == "pyproject.toml", parse_pyproject),
        ("go", |n| n == "go.mod", |t| Ok(parse_go_mod(t))),
        ("cargo", |n| n == "Cargo.toml", parse_cargo_toml),
        ("maven", |n| n == "pom.xml", |t| Ok(parse_pom(t))),
        ("maven", |n| n == "build.gradle" || n == "build.gradle.kts", |t| Ok(parse_gradle(t))),
    ]
}

pub struct DependenciesStep;

impl ExtractionStep for DependenciesStep {
    fn metadata_type(&self) -> MetadataType {
        MetadataType::Dependencies
    }

    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>> {
        let mut ecosystems: BTreeMap<&str, Declared> = BTreeMap::new();
        let mut errors = FileErrors::default();
        let mut files = Vec::new();

        for (ecosystem, matches, parse) in parsers() {
            let Some(file) = ctx
                .find_all(matches)
                .into_iter()
                .min_by_key(|f| f.components().count())
            else {
                continue;
            };
            if let Some(declared) = read_with(ctx, file, &mut errors, parse) {
                ecosystems.entry(ecosystem).or_default().merge(declared);
                files.push(display(file));
            }
        }

        let mut data = Map::new();
        errors.attach(&mut data);
        if ecosystems.is_empty() && data.is_empty() {
            return Ok(None);
        }

        let total: usize = ecosystems.values().map(Declared::len).sum();
        let frameworks = detect_frameworks(ecosystems.values().flat_map(|d| d.runtime.keys()));
        data.insert(
            "ecosystems".into(),
            Value::Object(
                ecosystems
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        );
        data.insert("frameworks".into(), json!(frameworks));
        data.insert("total".into(), json!(total));

        let confidence = if files.is_empty() { 0.3 } else { 0.95 };
        Ok(Some(
            ExtractedMetadata::new(MetadataType::Dependencies, confidence, Value::Object(data))
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
    fn test_parse_requirement_lines() {
        assert_eq!(
            parse_requirement("Flask[async]>=2.0 ; python_version > '3.8'"),
            Some(("flask".into(), ">=2.0".into()))
        );
        assert_eq!(parse_requirement("requests"), Some(("requests".into(), "*".into())));
        assert_eq!(parse_requirement("-r base.txt"), None);
        assert_eq!(parse_requirement("# comment"), None);
    }

    #[test]
    fn test_parse_go_mod_block_and_single() {
        let declared = parse_go_mod(
            "module example.com/api\n\ngo 1.22\n\nrequire github.com/gin-gonic/gin v1.9.1\n\
             require (\n\tgolang.org/x/net v0.20.0 // indirect\n\tgithub.com/google/uuid v1.6.0\n)\n",
        );
        assert_eq!(declared.runtime["github.com/gin-gonic/gin"], "v1.9.1");
        assert_eq!(declared.runtime["github.com/google/uuid"], "v1.6.0");
        assert_eq!(declared.dev["golang.org/x/net"], "v0.20.0");
    }

    #[test]
    fn test_parse_cargo_and_pyproject() {
        let cargo = parse_cargo_toml(
            "[dependencies]\naxum = \"0.7\"\nlocal = { path = \"../local\" }\n[dev-dependencies]\ntempfile = \"3\"\n",
        )
        .unwrap();
        assert_eq!(cargo.runtime["axum"], "0.7");
        assert_eq!(cargo.runtime["local"], "path");
        assert_eq!(cargo.dev["tempfile"], "3");

        let py = parse_pyproject(
            "[tool.poetry.dependencies]\npython = \"^3.11\"\nfastapi = \"^0.110\"\n\
             [tool.poetry.group.dev.dependencies]\npytest = \"^8\"\n",
        )
        .unwrap();
        assert!(!py.runtime.contains_key("python"));
        assert_eq!(py.runtime["fastapi"], "^0.110");
        assert_eq!(py.dev["pytest"], "^8");
    }

    #[test]
    fn test_parse_pom_and_gradle() {
        let pom = parse_pom(
            "<dependencies><dependency><groupId>org.springframework.boot</groupId>\
             <artifactId>spring-boot-starter-web</artifactId></dependency>\
             <dependency><groupId>junit</groupId><artifactId>junit</artifactId>\
             <version>4.13</version><scope>test</scope></dependency></dependencies>",
        );
        assert_eq!(pom.runtime["org.springframework.boot:spring-boot-starter-web"], "*");
        assert_eq!(pom.dev["junit:junit"], "4.13");

        let gradle = parse_gradle(
            "dependencies {\n    implementation 'com.google.guava:guava:33.0.0-jre'\n    \
             testImplementation(\"org.junit.jupiter:junit-jupiter:5.10.0\")\n}\n",
        );
        assert_eq!(gradle.runtime["com.google.guava:guava"], "33.0.0-jre");
        assert_eq!(gradle.dev["org.junit.jupiter:junit-jupiter"], "5.10.0");
    }

    #[test]
    fn test_step_collects_ecosystems_and_survives_bad_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"express": "^4.18.0"}, "devDependencies": {"jest": "^29"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[dependencies\n").unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask==3.0\n").unwrap();

        let record = ServiceRecord::from(
            RawService::new("svc", "node", ServiceSource::Local).with_location(dir.path().to_string_lossy()),
        );
        let config = ExtractorConfig::default();
        let ctx = ServiceContext::new(&record, &config);
        let meta = DependenciesStep.extract(&ctx).unwrap().unwrap();

        assert_eq!(meta.data["ecosystems"]["npm"]["runtime"]["express"], "^4.18.0");
        assert_eq!(meta.data["ecosystems"]["pypi"]["runtime"]["flask"], "==3.0");
        assert_eq!(meta.data["frameworks"], json!(["express", "flask"]));
        assert_eq!(meta.data["total"], 3);
        assert_eq!(meta.data["errors"][0]["file"], "Cargo.toml");
    }
}
