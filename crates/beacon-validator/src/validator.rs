//! The service validator.

use std::collections::{HashMap, HashSet};

use beacon_health::ProbeFactory;
use beacon_types::{HealthStatus, ProbeDescriptor, ServiceRecord, ValidationResult};
use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

use crate::checks::{
    check_configuration, check_dependencies, check_security, check_structure, check_type_fields,
    Findings, SensitiveMatcher,
};
use crate::config::ValidatorConfig;
use crate::cycles::find_dependency_cycles;
use crate::error::{ValidatorError, ValidatorResult};

/// Runs the structural, type, configuration, security and dependency checks,
/// and optionally a health probe.
#[derive(Debug, Clone)]
pub struct ServiceValidator {
    config: ValidatorConfig,
    matcher: SensitiveMatcher,
    probes: ProbeFactory,
}

impl ServiceValidator {
    pub fn new(config: ValidatorConfig) -> ValidatorResult<Self> {
        if config.check_health && config.probe.timeout_ms == 0 {
            return Err(ValidatorError::Configuration(
                "probe timeout must be greater than zero when health checks are enabled".into(),
            ));
        }
        let matcher =
            SensitiveMatcher::new(&config.sensitive_terms, &config.sensitive_value_patterns)?;
        let probes = ProbeFactory::new(config.probe.clone());
        Ok(Self {
            config,
            matcher,
            probes,
        })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    fn static_findings(&self, record: &ServiceRecord) -> Findings {
        let mut findings = check_structure(record);
        findings.extend(check_type_fields(record));
        findings.extend(check_configuration(record));
        findings.extend(check_security(record, &self.matcher));
        findings.extend(check_dependencies(record));
        findings
    }

    /// The five checks without any probing.
    pub fn validate_static(&self, record: &ServiceRecord) -> ValidationResult {
        let findings = self.static_findings(record);
        ValidationResult::from_findings(findings.issues, findings.warnings, self.config.strict)
    }

    async fn health_findings(&self, record: &ServiceRecord, findings: &mut Findings) {
        let descriptor = ProbeDescriptor::from_record(record);
        if descriptor.is_empty() {
            return;
        }
        match self.probes.check(&descriptor).await {
            Ok(result) => match result.status {
                HealthStatus::Unhealthy => {
                    findings.issue(format!("Health check failed: {}", result.reason))
                }
                HealthStatus::Timeout => {
                    findings.warn(format!("Health check timed out: {}", result.reason))
                }
                HealthStatus::Healthy | HealthStatus::Unknown => {}
            },
            Err(e) => findings.warn(format!("Health check could not run: {}", e)),
        }
    }

    #[instrument(skip(self, record), fields(service = %record.name))]
    pub async fn validate(&self, record: &ServiceRecord) -> ValidationResult {
        let mut findings = self.static_findings(record);
        if self.config.check_health {
            self.health_findings(record, &mut findings).await;
        }

        let result =
            ValidationResult::from_findings(findings.issues, findings.warnings, self.config.strict);
        if result.is_valid {
            debug!(warnings = result.warnings.len(), "Service validated");
        } else {
            warn!(
                issues = result.issues.len(),
                warnings = result.warnings.len(),
                "Service failed validation"
            );
        }
        result
    }

    /// Validate a batch, in order, and flag every record on a dependency cycle.
    ///
    /// At most `max_concurrency` records are validated at once.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn validate_all(&self, records: &[ServiceRecord]) -> Vec<ValidationResult> {
        let mut results: Vec<ValidationResult> = stream::iter(records.iter().map(|r| self.validate(r)).collect::<Vec<_>>())
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let cycles = find_dependency_cycles(records);
        if cycles.is_empty() {
            return results;
        }

        let names: HashMap<&str, &str> = records
            .iter()
            .map(|r| (r.id.as_str(), r.name.as_str()))
            .collect();
        let index: HashMap<&str, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.as_str(), i))
            .collect();

        for cycle in &cycles {
            let path = cycle
                .iter()
                .map(|id| names.get(id.as_str()).copied().unwrap_or(id.as_str()))
                .collect::<Vec<_>>()
                .join(" -> ");
            warn!(cycle = %path, "Dependency cycle detected");

            let members: HashSet<&str> = cycle.iter().map(String::as_str).collect();
            for id in members {
                if let Some(&i) = index.get(id) {
                    results[i].add_warning(
                        format!("Dependency cycle detected: {}", path),
                        self.config.strict,
                    );
                }
            }
        }
        results
    }
}
