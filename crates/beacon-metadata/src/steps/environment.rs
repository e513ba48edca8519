//! Environment variable files with sensitive values withheld.

use std::collections::BTreeSet;

use beacon_types::{ExtractedMetadata, MetadataType};
use serde_json::{json, Map, Value};

use super::{is_sensitive_key, read_with, ExtractionStep, FileErrors};
use crate::context::{display, ServiceContext};
use crate::error::MetadataResult;

fn is_env_file(name: &str) -> bool {
    name == ".env" || name.starts_with(".env.") || name.ends_with(".env")
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    for quote in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(quote) && v.ends_with(quote) {
            return &v[1..v.len() - 1];
        }
    }
    // Unquoted values may carry a trailing comment.
    match v.find(" #") {
        Some(i) => v[..i].trim_end(),
        None => v,
    }
}

/// Parse dotenv syntax into ordered key/value pairs.
pub fn parse_env(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.strip_prefix("export ").unwrap_or(l))
        .filter_map(|l| l.split_once('='))
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim().to_string(), unquote(v).to_string()))
        .collect()
}

pub struct EnvironmentStep;

impl ExtractionStep for EnvironmentStep {
    fn metadata_type(&self) -> MetadataType {
        MetadataType::Environment
    }

    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>> {
        let words = &ctx.config().sensitive_words;
        let mut errors = FileErrors::default();
        let mut redacted = BTreeSet::new();
        let mut per_file = Map::new();
        let mut files = Vec::new();

        for file in ctx.find_all(is_env_file) {
            let Some(pairs) = read_with(ctx, file, &mut errors, |t| Ok(parse_env(t))) else {
                continue;
            };
            let mut vars = Map::new();
            for (key, value) in pairs {
                if is_sensitive_key(&key, words) {
                    redacted.insert(key);
                } else {
                    vars.insert(key, json!(value));
                }
            }
            per_file.insert(display(file), Value::Object(vars));
            files.push(display(file));
        }

        let mut data = Map::new();
        if !per_file.is_empty() {
            data.insert("files".into(), Value::Object(per_file));
        }

        // Compose environments arrive from discovery with values already masked.
        if let Some(declared) = ctx.record.metadata.get("environment").and_then(Value::as_object) {
            let mut vars = Map::new();
            for (key, value) in declared {
                if is_sensitive_key(key, words) {
                    redacted.insert(key.clone());
                } else {
                    vars.insert(key.clone(), value.clone());
                }
            }
            data.insert("declared".into(), Value::Object(vars));
        }

        if !redacted.is_empty() {
            data.insert("redacted_keys".into(), json!(redacted));
        }
        errors.attach(&mut data);
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            ExtractedMetadata::new(MetadataType::Environment, 0.85, Value::Object(data))
                .with_files(files),
        ))
    }
}
