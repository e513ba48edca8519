//! Static scan of code files for hard-coded secrets and dangerous calls.

use beacon_types::{ExtractedMetadata, MetadataType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::{ExtractionStep, FileErrors};
use crate::context::{display, ServiceContext};
use crate::error::MetadataResult;

struct Rule {
    kind: &'static str,
    pattern: Regex,
}

fn rules(table: &[(&'static str, &str)]) -> Vec<Rule> {
    table
        .iter()
        .map(|&(kind, pattern)| Rule {
            kind,
            pattern: Regex::new(pattern).expect("valid regex"),
        })
        .collect()
}

static SECRET_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (
            "hardcoded_credential",
            r#"(?i)\b[A-Za-z_]*(password|passwd|secret|api[_-]?key|access[_-]?key|token)[A-Za-z_]*\s*[:=]\s*['"]([^'"\s]{4,})['"]"#,
        ),
        ("aws_access_key", r"\b(AKIA[0-9A-Z]{16})\b"),
        ("private_key", r"-----BEGIN (RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----"),
        ("github_token", r"\b(gh[pousr]_[A-Za-z0-9]{36,})\b"),
    ])
});

static DANGEROUS_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        ("eval", r"(^|[^\w.])eval\s*\("),
        ("exec", r"(^|[^\w.])exec\s*\("),
        ("shell_exec", r"\bshell_exec\s*\("),
        ("os_system", r"\bos\.system\s*\("),
        ("subprocess_shell", r"\bsubprocess\.\w+\([^)]*shell\s*=\s*True"),
        ("child_process", r#"require\(\s*['"]child_process['"]\s*\)|\bexecSync\s*\("#),
    ])
});

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(['"])[^'"]*(['"])"#).expect("valid regex"));

/// A line with every quoted literal replaced by `"***"`, length-capped.
pub fn redact_line(line: &str) -> String {
    let redacted = QUOTED.replace_all(line.trim(), "\"***\"");
    let mut out: String = redacted.chars().take(120).collect();
    if redacted.chars().count() > 120 {
        out.push('…');
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: &'static str,
    pub line: usize,
    pub snippet: String,
}

fn scan_rules(text: &str, table: &[Rule]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") || (trimmed.starts_with('#') && !trimmed.starts_with("#!")) {
            continue;
        }
        for rule in table {
            if rule.pattern.is_match(line) {
                findings.push(Finding {
                    kind: rule.kind,
                    line: index + 1,
                    snippet: redact_line(line),
                });
            }
        }
    }
    findings
}

pub fn scan_secrets(text: &str) -> Vec<Finding> {
    scan_rules(text, &SECRET_RULES)
}

pub fn scan_dangerous_calls(text: &str) -> Vec<Finding> {
    scan_rules(text, &DANGEROUS_RULES)
}

pub struct SecurityStep;

impl ExtractionStep for SecurityStep {
    fn metadata_type(&self) -> MetadataType {
        MetadataType::Security
    }

    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>> {
        let code_files = ctx.code_files();
        if code_files.is_empty() {
            return Ok(None);
        }

        let mut secrets = Vec::new();
        let mut dangerous = Vec::new();
        let mut errors = FileErrors::default();
        let mut flagged = Vec::new();
        let mut scanned = 0usize;

        for file in code_files {
            let text = match ctx.read(file) {
                Ok(text) => text,
                Err(e) => {
                    errors.push(file, e);
                    continue;
                }
            };
            scanned += 1;
            let name = display(file);
            let found_secrets = scan_secrets(&text);
            let found_calls = scan_dangerous_calls(&text);
            if !found_secrets.is_empty() || !found_calls.is_empty() {
                flagged.push(name.clone());
            }
            let as_json = |f: Finding| json!({"file": name, "line": f.line, "kind": f.kind, "snippet": f.snippet});
            secrets.extend(found_secrets.into_iter().map(as_json));
            dangerous.extend(found_calls.into_iter().map(as_json));
        }

        let mut data = Map::new();
        let risk = if !secrets.is_empty() {
            "high"
        } else if !dangerous.is_empty() {
            "medium"
        } else {
            "low"
        };
        data.insert("risk".into(), json!(risk));
        data.insert("files_scanned".into(), json!(scanned));
        data.insert("secrets".into(), Value::Array(secrets));
        data.insert("dangerous_calls".into(), Value::Array(dangerous));
        errors.attach(&mut data);

        Ok(Some(
            ExtractedMetadata::new(MetadataType::Security, 0.7, Value::Object(data))
                .with_files(flagged),
        ))
    }
}
