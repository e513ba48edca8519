//! Identity, description, license and readme.

use beacon_types::{ExtractedMetadata, MetadataType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::ExtractionStep;
use crate::context::{display, ServiceContext};
use crate::error::MetadataResult;

static LICENSES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("MIT", r"(?i)\bMIT License\b|Permission is hereby granted, free of charge"),
        ("Apache-2.0", r"(?i)Apache License,?\s+Version 2\.0"),
        ("GPL-3.0", r"(?i)GNU GENERAL PUBLIC LICENSE\s+Version 3"),
        ("GPL-2.0", r"(?i)GNU GENERAL PUBLIC LICENSE\s+Version 2"),
        ("BSD-3-Clause", r"(?is)Redistribution and use in source and binary forms.*Neither the name"),
        ("MPL-2.0", r"(?i)Mozilla Public License,?\s+(Version|v\.?)\s*2\.0"),
    ]
    .into_iter()
    .map(|(id, pattern)| (id, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Identify a license by its text.
pub fn detect_license(text: &str) -> Option<&'static str> {
    LICENSES
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(id, _)| *id)
}

/// First heading and first paragraph of a markdown readme.
pub fn summarize_readme(text: &str) -> (Option<String>, Option<String>) {
    let mut title = None;
    let mut paragraph = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix('#') {
            if title.is_none() {
                title = Some(heading.trim_start_matches('#').trim().to_string());
                continue;
            }
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("[!") || trimmed.starts_with("![") {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(trimmed);
    }
    let summary = (!paragraph.is_empty()).then(|| paragraph.join(" "));
    (title.filter(|t| !t.is_empty()), summary)
}

pub struct BasicStep;

impl ExtractionStep for BasicStep {
    fn metadata_type(&self) -> MetadataType {
        MetadataType::Basic
    }

    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>> {
        let record = ctx.record;
        let mut data = Map::new();
        let mut files = Vec::new();

        data.insert("name".into(), json!(record.name));
        data.insert("type".into(), json!(record.service_type));
        data.insert("source".into(), json!(record.source));
        if let Some(version) = record.field("version") {
            data.insert("version".into(), version);
        }
        if let Some(description) = record.field("description") {
            data.insert("description".into(), description);
        }
        if let Some(location) = &record.location {
            data.insert("location".into(), json!(location));
        }

        let readme = ctx
            .find_all(|name| name.to_ascii_lowercase().starts_with("readme"))
            .into_iter()
            .min_by_key(|f| f.components().count());
        if let Some(readme) = readme {
            if let Ok(text) = ctx.read(readme) {
                let (title, summary) = summarize_readme(&text);
                if let Some(title) = title {
                    data.insert("readme_title".into(), json!(title));
                }
                if let Some(summary) = summary {
                    data.entry("description").or_insert_with(|| json!(summary.clone()));
                    data.insert("readme_summary".into(), json!(summary));
                }
                files.push(display(readme));
            }
        }

        let license = ["LICENSE", "LICENSE.md", "LICENSE.txt", "COPYING"]
            .iter()
            .find_map(|name| ctx.find(name));
        if let Some(license) = license {
            if let Ok(text) = ctx.read(license) {
                let id = detect_license(&text).unwrap_or("unknown");
                data.insert("license".into(), json!(id));
                files.push(display(license));
            }
        }

        let confidence = if ctx.root().is_some() { 0.9 } else { 0.6 };
        Ok(Some(
            ExtractedMetadata::new(MetadataType::Basic, confidence, Value::Object(data))
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
    fn test_readme_summary() {
        let (title, summary) =
            summarize_readme("# Billing API\n\n![badge](x)\n\nHandles invoices\nand refunds.\n\n## Usage\n");
        assert_eq!(title.as_deref(), Some("Billing API"));
        assert_eq!(summary.as_deref(), Some("Handles invoices and refunds."));
    }

    #[test]
    fn test_detect_license() {
        assert_eq!(detect_license("MIT License\n\nCopyright (c)"), Some("MIT"));
        assert_eq!(
            detect_license("Apache License\nVersion 2.0, January 2004"),
            Some("Apache-2.0")
        );
        assert_eq!(detect_license("all rights reserved"), None);
    }

    #[test]
    fn test_basic_step_uses_readme_when_description_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "# svc\n\nDoes things.\n").unwrap();
        fs::write(dir.path().join("LICENSE"), "MIT License").unwrap();

        let record = ServiceRecord::from(
            RawService::new("svc", "node", ServiceSource::Local).with_location(dir.path().to_string_lossy()),
        );
        let config = ExtractorConfig::default();
        let ctx = ServiceContext::new(&record, &config);
        let meta = BasicStep.extract(&ctx).unwrap().unwrap();

        assert_eq!(meta.data["description"], "Does things.");
        assert_eq!(meta.data["license"], "MIT");
        assert_eq!(meta.source_files, vec!["README.md", "LICENSE"]);
    }
}
