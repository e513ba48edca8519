//! Extraction steps, one per metadata type.

pub mod api;
pub mod basic;
pub mod configuration;
pub mod dependencies;
pub mod environment;
pub mod runtime;
pub mod security;

pub use api::ApiStep;
pub use basic::BasicStep;
pub use configuration::ConfigurationStep;
pub use dependencies::DependenciesStep;
pub use environment::EnvironmentStep;
pub use runtime::RuntimeStep;
pub use security::SecurityStep;

use std::path::Path;

use beacon_types::{ExtractedMetadata, MetadataType};
use serde_json::{json, Value};

use crate::context::{display, ServiceContext};
use crate::error::MetadataResult;

/// One independently failing unit of extraction.
pub trait ExtractionStep: Send + Sync {
    fn metadata_type(&self) -> MetadataType;

    /// `Ok(None)` when there is nothing to report.
    fn extract(&self, ctx: &ServiceContext<'_>) -> MetadataResult<Option<ExtractedMetadata>>;
}

/// Per-file failures recorded inside a step so one bad file does not sink it.
#[derive(Debug, Default)]
pub(crate) struct FileErrors(Vec<Value>);

impl FileErrors {
    pub fn push(&mut self, file: &Path, error: impl ToString) {
        self.0.push(json!({"file": display(file), "error": error.to_string()}));
    }

    pub fn attach(self, data: &mut serde_json::Map<String, Value>) {
        if !self.0.is_empty() {
            data.insert("errors".into(), Value::Array(self.0));
        }
    }
}

/// Read and parse one file, recording failures instead of returning them.
pub(crate) fn read_with<T>(
    ctx: &ServiceContext<'_>,
    file: &Path,
    errors: &mut FileErrors,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Option<T> {
    let text = match ctx.read(file) {
        Ok(text) => text,
        Err(e) => {
            errors.push(file, e);
            return None;
        }
    };
    match parse(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            errors.push(file, e);
            None
        }
    }
}

/// Whether a key contains one of the sensitive words, case-insensitively.
pub(crate) fn is_sensitive_key(key: &str, words: &[String]) -> bool {
    let key = key.to_ascii_lowercase();
    words.iter().any(|w| key.contains(w.as_str()))
}
