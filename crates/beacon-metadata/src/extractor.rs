//! Runs the configured extraction steps against one service.

use beacon_types::{ExtractedMetadata, Metadata, MetadataType, ServiceRecord};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::config::ExtractorConfig;
use crate::context::ServiceContext;
use crate::steps::{
    ApiStep, BasicStep, ConfigurationStep, DependenciesStep, EnvironmentStep, ExtractionStep,
    RuntimeStep, SecurityStep,
};

fn step_for(kind: MetadataType) -> Box<dyn ExtractionStep> {
    match kind {
        MetadataType::Basic => Box::new(BasicStep),
        MetadataType::Configuration => Box::new(ConfigurationStep),
        MetadataType::Dependencies => Box::new(DependenciesStep),
        MetadataType::Security => Box::new(SecurityStep),
        MetadataType::Api => Box::new(ApiStep),
        MetadataType::Runtime => Box::new(RuntimeStep),
        MetadataType::Environment => Box::new(EnvironmentStep),
    }
}

/// Best-effort extractor. A failing step is logged and skipped.
pub struct MetadataExtractor {
    config: ExtractorConfig,
    steps: Vec<Box<dyn ExtractionStep>>,
}

impl std::fmt::Debug for MetadataExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataExtractor")
            .field("steps", &self.config.steps)
            .finish()
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl MetadataExtractor {
    pub fn new(mut config: ExtractorConfig) -> Self {
        let mut seen = Vec::new();
        config.steps.retain(|s| {
            let first = !seen.contains(s);
            seen.push(*s);
            first
        });
        let steps = config.steps.iter().copied().map(step_for).collect();
        Self { config, steps }
    }

    /// Add a custom step after the built-in ones.
    pub fn with_step(mut self, step: Box<dyn ExtractionStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    #[instrument(skip(self, record), fields(service = %record.name))]
    pub fn extract(&self, record: &ServiceRecord) -> Vec<ExtractedMetadata> {
        let ctx = ServiceContext::new(record, &self.config);
        let mut results = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let kind = step.metadata_type();
            match step.extract(&ctx) {
                Ok(Some(meta)) => results.push(meta),
                Ok(None) => debug!(step = kind.as_str(), "Nothing extracted"),
                Err(e) => warn!(step = kind.as_str(), error = %e, "Extraction step failed"),
            }
        }
        debug!(
            files = ctx.files().len(),
            extracted = results.len(),
            "Metadata extraction finished"
        );
        results
    }
}

/// Fold extraction results into a map keyed by metadata type, ready to be
/// stored under a record's `extracted` metadata key.
pub fn summarize(results: &[ExtractedMetadata]) -> Metadata {
    results
        .iter()
        .map(|m| {
            (
                m.metadata_type.as_str().to_string(),
                json!({
                    "confidence": m.confidence,
                    "source_files": m.source_files,
                    "data": m.data,
                    "extracted_at": m.extracted_at,
                }),
            )
        })
        .collect()
}

/// Attach a summary to a record, replacing any previous one.
pub fn attach(record: &mut ServiceRecord, results: &[ExtractedMetadata]) {
    if results.is_empty() {
        return;
    }
    record
        .metadata
        .insert("extracted".into(), Value::Object(summarize(results)));
}
