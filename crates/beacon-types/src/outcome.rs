//! Validation and registration outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of validating a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,

    /// Hard failures
    #[serde(default)]
    pub issues: Vec<String>,

    /// Soft findings
    #[serde(default)]
    pub warnings: Vec<String>,

    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    /// Build a result; strict mode also treats warnings as blocking
    pub fn from_findings(issues: Vec<String>, warnings: Vec<String>, strict: bool) -> Self {
        let is_valid = issues.is_empty() && (!strict || warnings.is_empty());
        Self {
            is_valid,
            issues,
            warnings,
            validated_at: Utc::now(),
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>, strict: bool) {
        self.warnings.push(warning.into());
        if strict {
            self.is_valid = false;
        }
    }
}

/// What registration did with an incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationAction {
    Created,
    Updated,
    Duplicate,
    Error,
}

impl std::fmt::Display for RegistrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationAction::Created => write!(f, "created"),
            RegistrationAction::Updated => write!(f, "updated"),
            RegistrationAction::Duplicate => write!(f, "duplicate"),
            RegistrationAction::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub action: RegistrationAction,
    pub service_id: Option<String>,
    pub message: String,
}

impl RegistrationResult {
    pub fn created(id: impl Into<String>, name: &str) -> Self {
        let id = id.into();
        Self {
            message: format!("Registered new service '{}' ({})", name, id),
            action: RegistrationAction::Created,
            service_id: Some(id),
        }
    }

    pub fn updated(id: impl Into<String>, name: &str) -> Self {
        let id = id.into();
        Self {
            message: format!("Updated existing service '{}' ({})", name, id),
            action: RegistrationAction::Updated,
            service_id: Some(id),
        }
    }

    pub fn duplicate(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: RegistrationAction::Duplicate,
            service_id: Some(id.into()),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            action: RegistrationAction::Error,
            service_id: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_do_not_block_unless_strict() {
        let lenient = ValidationResult::from_findings(vec![], vec!["w".into()], false);
        assert!(lenient.is_valid);

        let strict = ValidationResult::from_findings(vec![], vec!["w".into()], true);
        assert!(!strict.is_valid);
    }

    #[test]
    fn test_issues_always_block() {
        let result = ValidationResult::from_findings(vec!["bad".into()], vec![], false);
        assert!(!result.is_valid);
    }
}
