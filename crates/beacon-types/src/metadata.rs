//! Enriched metadata produced by deep analysis of a service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of extracted metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataType {
    Basic,
    Configuration,
    Dependencies,
    Security,
    Api,
    Runtime,
    Environment,
}

impl MetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::Basic => "basic",
            MetadataType::Configuration => "configuration",
            MetadataType::Dependencies => "dependencies",
            MetadataType::Security => "security",
            MetadataType::Api => "api",
            MetadataType::Runtime => "runtime",
            MetadataType::Environment => "environment",
        }
    }
}

impl std::fmt::Display for MetadataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of extracted metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub metadata_type: MetadataType,

    /// Confidence in the extraction (0.0-1.0)
    pub confidence: f64,

    /// Files the data was derived from
    #[serde(default)]
    pub source_files: Vec<String>,

    pub data: serde_json::Value,

    pub extracted_at: DateTime<Utc>,
}

impl ExtractedMetadata {
    pub fn new(metadata_type: MetadataType, confidence: f64, data: serde_json::Value) -> Self {
        Self {
            metadata_type,
            confidence: confidence.clamp(0.0, 1.0),
            source_files: Vec::new(),
            data,
            extracted_at: Utc::now(),
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_files.extend(files.into_iter().map(Into::into));
        self
    }
}
