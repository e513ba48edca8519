//! Validator configuration.

use beacon_health::ProbeConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Treat warnings as blocking.
    #[serde(default)]
    pub strict: bool,

    /// Run a health probe as part of validation.
    #[serde(default)]
    pub check_health: bool,

    /// Metadata key segments treated as sensitive, matched case-insensitively.
    #[serde(default = "default_sensitive_terms")]
    pub sensitive_terms: Vec<String>,

    /// Regexes over string metadata values that indicate an inline secret.
    #[serde(default = "default_sensitive_value_patterns")]
    pub sensitive_value_patterns: Vec<String>,

    /// Probe settings used when `check_health` is set.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Records validated at once by `validate_all`.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            strict: false,
            check_health: false,
            sensitive_terms: default_sensitive_terms(),
            sensitive_value_patterns: default_sensitive_value_patterns(),
            probe: ProbeConfig::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    10
}

fn default_sensitive_terms() -> Vec<String> {
    ["password", "passwd", "secret", "token", "key", "apikey", "credential", "credentials"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sensitive_value_patterns() -> Vec<String> {
    vec![r"(?i)(password|secret|token|api[_-]?key|credential)\s*[=:]".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_lenient() {
        let config = ValidatorConfig::default();
        assert!(!config.strict);
        assert!(!config.check_health);
        assert!(config.sensitive_terms.iter().any(|t| t == "password"));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: ValidatorConfig = serde_json::from_str(r#"{"strict": true}"#).unwrap();
        assert!(config.strict);
        assert_eq!(config.sensitive_value_patterns.len(), 1);
    }
}
