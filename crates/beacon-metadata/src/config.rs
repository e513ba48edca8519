//! Extractor configuration.

use beacon_types::MetadataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Steps to run; all by default.
    #[serde(default = "default_steps")]
    pub steps: Vec<MetadataType>,

    /// Files larger than this are not read.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Upper bound on files collected from one service tree.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Walk depth below the service location.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,

    /// Extensions scanned for secrets, dangerous calls and routes.
    #[serde(default = "default_code_extensions")]
    pub code_extensions: Vec<String>,

    /// Environment keys containing any of these words are redacted.
    #[serde(default = "default_sensitive_words")]
    pub sensitive_words: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
            max_depth: default_max_depth(),
            skip_dirs: default_skip_dirs(),
            code_extensions: default_code_extensions(),
            sensitive_words: default_sensitive_words(),
        }
    }
}

fn default_steps() -> Vec<MetadataType> {
    vec![
        MetadataType::Basic,
        MetadataType::Configuration,
        MetadataType::Dependencies,
        MetadataType::Security,
        MetadataType::Api,
        MetadataType::Runtime,
        MetadataType::Environment,
    ]
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_max_files() -> usize {
    500
}

fn default_max_depth() -> usize {
    4
}

fn default_skip_dirs() -> Vec<String> {
    [".git", "node_modules", "target", "__pycache__", "venv", ".venv", "dist", "build", "vendor"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_code_extensions() -> Vec<String> {
    ["js", "mjs", "cjs", "ts", "py", "go", "rs", "java", "kt", "rb", "php", "sh"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sensitive_words() -> Vec<String> {
    ["password", "passwd", "secret", "token", "key", "credential", "private"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
