//! JSON and CSV encodings of the full record set.
//!
//! CSV keeps scalar fields in their own columns and JSON-encodes every
//! nested field (endpoints, metadata, tags, dependencies, results) per cell.

use std::str::FromStr;

use beacon_types::{HealthCheckResult, HealthStatus, ServiceRecord, ServiceSource, ValidationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(RegistryError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: String,
    name: String,
    #[serde(rename = "type")]
    service_type: String,
    source: ServiceSource,
    status: String,
    health_status: Option<HealthStatus>,
    location: Option<String>,
    version: Option<String>,
    owner: Option<String>,
    endpoints: String,
    metadata: String,
    tags: String,
    dependencies: String,
    discovered_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    validated: bool,
    validation_result: String,
    health_result: String,
}

fn export_error(format: ExportFormat, reason: impl ToString) -> RegistryError {
    RegistryError::Export {
        format: format.to_string(),
        reason: reason.to_string(),
    }
}

fn import_error(format: ExportFormat, reason: impl ToString) -> RegistryError {
    RegistryError::Import {
        format: format.to_string(),
        reason: reason.to_string(),
    }
}

fn cell<T: Serialize>(value: &T) -> RegistryResult<String> {
    serde_json::to_string(value).map_err(|e| export_error(ExportFormat::Csv, e))
}

fn optional_cell<T: Serialize>(value: &Option<T>) -> RegistryResult<String> {
    match value {
        Some(v) => cell(v),
        None => Ok(String::new()),
    }
}

fn parse_cell<T: serde::de::DeserializeOwned>(column: &str, text: &str) -> RegistryResult<T> {
    serde_json::from_str(text)
        .map_err(|e| import_error(ExportFormat::Csv, format!("column {}: {}", column, e)))
}

fn parse_optional_cell<T: serde::de::DeserializeOwned>(
    column: &str,
    text: &str,
) -> RegistryResult<Option<T>> {
    if text.is_empty() {
        return Ok(None);
    }
    parse_cell(column, text).map(Some)
}

impl CsvRow {
    fn from_record(r: &ServiceRecord) -> RegistryResult<Self> {
        Ok(Self {
            id: r.id.clone(),
            name: r.name.clone(),
            service_type: r.service_type.clone(),
            source: r.source,
            status: r.status.clone(),
            health_status: r.health_status,
            location: r.location.clone(),
            version: r.version.clone(),
            owner: r.owner.clone(),
            endpoints: cell(&r.endpoints)?,
            metadata: cell(&r.metadata)?,
            tags: cell(&r.tags)?,
            dependencies: cell(&r.dependencies)?,
            discovered_at: r.discovered_at,
            updated_at: r.updated_at,
            last_seen: r.last_seen,
            validated: r.validated,
            validation_result: optional_cell(&r.validation_result)?,
            health_result: optional_cell(&r.health_result)?,
        })
    }

    fn into_record(self) -> RegistryResult<ServiceRecord> {
        Ok(ServiceRecord {
            endpoints: parse_cell("endpoints", &self.endpoints)?,
            metadata: parse_cell("metadata", &self.metadata)?,
            tags: parse_cell("tags", &self.tags)?,
            dependencies: parse_cell("dependencies", &self.dependencies)?,
            validation_result: parse_optional_cell::<ValidationResult>(
                "validation_result",
                &self.validation_result,
            )?,
            health_result: parse_optional_cell::<HealthCheckResult>(
                "health_result",
                &self.health_result,
            )?,
            id: self.id,
            name: self.name,
            service_type: self.service_type,
            source: self.source,
            status: self.status,
            health_status: self.health_status,
            location: self.location.filter(|s| !s.is_empty()),
            version: self.version.filter(|s| !s.is_empty()),
            owner: self.owner.filter(|s| !s.is_empty()),
            discovered_at: self.discovered_at,
            updated_at: self.updated_at,
            last_seen: self.last_seen,
            validated: self.validated,
        })
    }
}

pub fn export_records(records: &[ServiceRecord], format: ExportFormat) -> RegistryResult<String> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(records).map_err(|e| export_error(format, e))
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for record in records {
                writer
                    .serialize(CsvRow::from_record(record)?)
                    .map_err(|e| export_error(format, e))?;
            }
            let bytes = writer.into_inner().map_err(|e| export_error(format, e))?;
            String::from_utf8(bytes).map_err(|e| export_error(format, e))
        }
    }
}

pub fn import_records(data: &str, format: ExportFormat) -> RegistryResult<Vec<ServiceRecord>> {
    match format {
        ExportFormat::Json => serde_json::from_str(data).map_err(|e| import_error(format, e)),
        ExportFormat::Csv => {
            let mut reader = csv::Reader::from_reader(data.as_bytes());
            reader
                .deserialize::<CsvRow>()
                .map(|row| row.map_err(|e| import_error(format, e))?.into_record())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::{Endpoint, ProbeKind, RawService};
    use serde_json::json;

    fn records() -> Vec<ServiceRecord> {
        let mut raw = RawService::new("api", "docker-service", ServiceSource::Docker)
            .with_tag("web")
            .with_tag("team, a");
        raw.endpoints.push(Endpoint::http("localhost", 8080));
        raw.metadata.insert(
            "labels".into(),
            json!({"com.example.note": "has \"quotes\", commas\nand newlines"}),
        );
        let mut api = ServiceRecord::from(raw);
        api.set_health(HealthCheckResult::healthy(ProbeKind::Http, "200 OK"));

        let worker = ServiceRecord::from(
            RawService::new("worker", "python", ServiceSource::Local).with_location("/srv/worker"),
        );
        vec![api, worker]
    }

    #[test]
    fn test_csv_keeps_nested_fields() {
        let original = records();
        let text = export_records(&original, ExportFormat::Csv).unwrap();
        assert!(text.lines().next().unwrap().starts_with("id,name,type,source"));

        let back = import_records(&text, ExportFormat::Csv).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_json_is_an_array_of_records() {
        let text = export_records(&records(), ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["type"], "docker-service");
    }

    #[test]
    fn test_format_parsing_and_bad_input() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(RegistryError::UnknownFormat(_))
        ));
        assert!(matches!(
            import_records("not json", ExportFormat::Json),
            Err(RegistryError::Import { .. })
        ));
    }
}
