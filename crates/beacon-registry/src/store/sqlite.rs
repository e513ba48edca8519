//! SQLite-backed store.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use beacon_types::{HealthStatus, ServiceRecord, ServiceSource};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{HistoryAction, HistoryEntry, ServiceStore};
use crate::error::{StorageError, StorageResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS services (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        status TEXT NOT NULL,
        location TEXT,
        metadata TEXT NOT NULL,
        endpoints TEXT NOT NULL,
        health_status TEXT,
        tags TEXT NOT NULL,
        dependencies TEXT NOT NULL,
        registered_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_seen TEXT NOT NULL,
        version TEXT,
        owner TEXT,
        source TEXT NOT NULL,
        validated INTEGER NOT NULL DEFAULT 0,
        validation_result TEXT,
        health_result TEXT
    );
    "#,
    "CREATE INDEX IF NOT EXISTS services_name ON services(name);",
    "CREATE INDEX IF NOT EXISTS services_type ON services(type);",
    "CREATE INDEX IF NOT EXISTS services_status ON services(status);",
    "CREATE INDEX IF NOT EXISTS services_owner ON services(owner);",
    "CREATE INDEX IF NOT EXISTS services_source ON services(source);",
    r#"
    CREATE TABLE IF NOT EXISTS service_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL,
        action TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        changes TEXT NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS service_history_service_id ON service_history(service_id);",
];

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and initialize the schema.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Connection(format!("{}: {}", url, e)))?
            .create_if_missing(true);

        // Every connection to `:memory:` is a separate database.
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .acquire_timeout(Duration::from_secs(connect_timeout_secs));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(format!("{}: {}", url, e)))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!(url = %url, "SQLite store ready");
        Ok(store)
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<String> {
        serde_json::to_string(value)
            .map_err(|e| StorageError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(column: &str, text: &str) -> StorageResult<T> {
        serde_json::from_str(text)
            .map_err(|e| StorageError::InvalidData(format!("column {}: {}", column, e)))
    }

    fn optional_json<T: serde::de::DeserializeOwned>(
        column: &str,
        text: Option<String>,
    ) -> StorageResult<Option<T>> {
        text.filter(|t| !t.is_empty())
            .map(|t| Self::from_json(column, &t))
            .transpose()
    }

    fn row_to_record(row: &SqliteRow) -> StorageResult<ServiceRecord> {
        let source: String = row.try_get("source")?;
        let health: Option<String> = row.try_get("health_status")?;
        let metadata: String = row.try_get("metadata")?;
        let endpoints: String = row.try_get("endpoints")?;
        let tags: String = row.try_get("tags")?;
        let dependencies: String = row.try_get("dependencies")?;

        Ok(ServiceRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            service_type: row.try_get("type")?,
            source: ServiceSource::from_str(&source)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            status: row.try_get("status")?,
            health_status: health
                .map(|h| HealthStatus::from_str(&h))
                .transpose()
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            endpoints: Self::from_json("endpoints", &endpoints)?,
            metadata: Self::from_json("metadata", &metadata)?,
            tags: Self::from_json("tags", &tags)?,
            dependencies: Self::from_json("dependencies", &dependencies)?,
            location: row.try_get("location")?,
            version: row.try_get("version")?,
            owner: row.try_get("owner")?,
            discovered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
            last_seen: row.try_get("last_seen")?,
            validated: row.try_get("validated")?,
            validation_result: Self::optional_json(
                "validation_result",
                row.try_get("validation_result")?,
            )?,
            health_result: Self::optional_json("health_result", row.try_get("health_result")?)?,
        })
    }
}

#[async_trait]
impl ServiceStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn load_all(&self) -> StorageResult<Vec<ServiceRecord>> {
        let rows = sqlx::query("SELECT * FROM services ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn upsert(&self, record: &ServiceRecord) -> StorageResult<()> {
        let validation = record.validation_result.as_ref().map(Self::to_json).transpose()?;
        let health = record.health_result.as_ref().map(Self::to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO services (
                id, name, type, status, location, metadata, endpoints, health_status,
                tags, dependencies, registered_at, updated_at, last_seen, version,
                owner, source, validated, validation_result, health_result
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                type = excluded.type,
                status = excluded.status,
                location = excluded.location,
                metadata = excluded.metadata,
                endpoints = excluded.endpoints,
                health_status = excluded.health_status,
                tags = excluded.tags,
                dependencies = excluded.dependencies,
                updated_at = excluded.updated_at,
                last_seen = excluded.last_seen,
                version = excluded.version,
                owner = excluded.owner,
                source = excluded.source,
                validated = excluded.validated,
                validation_result = excluded.validation_result,
                health_result = excluded.health_result
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.service_type)
        .bind(&record.status)
        .bind(&record.location)
        .bind(Self::to_json(&record.metadata)?)
        .bind(Self::to_json(&record.endpoints)?)
        .bind(record.health_status.map(|h| h.as_str()))
        .bind(Self::to_json(&record.tags)?)
        .bind(Self::to_json(&record.dependencies)?)
        .bind(record.discovered_at)
        .bind(record.updated_at)
        .bind(record.last_seen)
        .bind(&record.version)
        .bind(&record.owner)
        .bind(record.source.as_str())
        .bind(record.validated)
        .bind(validation)
        .bind(health)
        .execute(&self.pool)
        .await?;

        debug!(service_id = %record.id, "Persisted service");
        Ok(())
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO service_history (service_id, action, timestamp, changes) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.service_id)
        .bind(entry.action.as_str())
        .bind(entry.timestamp)
        .bind(Self::to_json(&entry.changes)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, service_id: &str, limit: usize) -> StorageResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT service_id, action, timestamp, changes FROM service_history \
             WHERE service_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(service_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let action: String = row.try_get("action")?;
                let changes: String = row.try_get("changes")?;
                let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
                Ok(HistoryEntry {
                    service_id: row.try_get("service_id")?,
                    action: HistoryAction::from_str(&action)?,
                    timestamp,
                    changes: Self::from_json::<Value>("changes", &changes)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::{Endpoint, HealthCheckResult, ProbeKind, RawService, ValidationResult};
    use serde_json::json;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", 5, 5).await.unwrap()
    }

    fn sample() -> ServiceRecord {
        let mut raw = RawService::new("svc-a", "node", ServiceSource::Local)
            .with_location("/srv/svc-a")
            .with_tag("node");
        raw.endpoints.push(Endpoint::http("localhost", 3000));
        raw.metadata.insert("main".into(), json!("index.js"));
        raw.dependencies.push("db".into());
        let mut record = ServiceRecord::from(raw);
        record.set_validation(ValidationResult::from_findings(vec![], vec!["w".into()], false));
        record.set_health(HealthCheckResult::healthy(ProbeKind::Http, "200 OK"));
        record
    }

    #[tokio::test]
    async fn test_upsert_and_load_round_trip() {
        let store = memory_store().await;
        let record = sample();
        store.upsert(&record).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_removes() {
        let store = memory_store().await;
        let mut record = sample();
        store.upsert(&record).await.unwrap();
        record.status = "stopped".into();
        store.upsert(&record).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, "stopped");

        assert!(store.delete(&record.id).await.unwrap());
        assert!(!store.delete(&record.id).await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = memory_store().await;
        for action in [HistoryAction::Created, HistoryAction::Updated, HistoryAction::Deregistered] {
            store
                .append_history(&HistoryEntry::new("abc", action, json!({})))
                .await
                .unwrap();
        }
        let history = store.history("abc", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, HistoryAction::Deregistered);
        assert_eq!(history[1].action, HistoryAction::Updated);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("beacon.db").display());

        let record = sample();
        {
            let store = SqliteStore::connect(&url, 2, 5).await.unwrap();
            store.upsert(&record).await.unwrap();
        }
        let reopened = SqliteStore::connect(&url, 2, 5).await.unwrap();
        let loaded = reopened.load_all().await.unwrap();
        assert_eq!(loaded[0].id, record.id);
    }
}
