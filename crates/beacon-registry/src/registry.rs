//! The deduplicating service registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use beacon_types::{
    deep_merge, DedupKey, HealthCheckResult, RawService, RegistrationResult, ServiceFilter,
    ServiceRecord, SourcePriority,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::format::{export_records, import_records, ExportFormat};
use crate::index::{IndexDimension, RegistryIndexes};
use crate::stats::{BulkUpdate, RegistryStats};
use crate::store::{HistoryAction, HistoryEntry, InMemoryStore, ServiceStore, SqliteStore};

#[derive(Debug, Default)]
struct RegistryState {
    records: HashMap<String, ServiceRecord>,
    by_key: HashMap<DedupKey, String>,
    indexes: RegistryIndexes,
    /// Ids whose durable copy lags behind memory.
    dirty: BTreeSet<String>,
}

impl RegistryState {
    fn insert(&mut self, record: ServiceRecord) {
        self.indexes.insert(&record);
        self.by_key.insert(record.dedup_key(), record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    fn take(&mut self, id: &str) -> Option<ServiceRecord> {
        let record = self.records.remove(id)?;
        self.indexes.remove(&record);
        self.by_key.remove(&record.dedup_key());
        Some(record)
    }

    /// Apply `mutate` to one record, keeping indexes in step.
    fn modify(&mut self, id: &str, mutate: impl FnOnce(&mut ServiceRecord)) -> Option<&ServiceRecord> {
        let mut record = self.take(id)?;
        mutate(&mut record);
        self.insert(record);
        self.records.get(id)
    }
}

/// Leaves rewritten by every validation, extraction or probe run.
const VOLATILE_LEAVES: &[&str] = &["validated_at", "extracted_at", "checked_at", "response_time_ms"];

/// Drop the volatile leaves under `validation_result`, `health_result` and
/// the extracted metadata summaries.
fn strip_volatile(record: &mut Map<String, Value>) {
    fn strip(value: &mut Value) {
        match value {
            Value::Object(map) => {
                for leaf in VOLATILE_LEAVES {
                    map.remove(*leaf);
                }
                map.values_mut().for_each(strip);
            }
            Value::Array(items) => items.iter_mut().for_each(strip),
            _ => {}
        }
    }

    for key in ["validation_result", "health_result"] {
        if let Some(value) = record.get_mut(key) {
            strip(value);
        }
    }
    if let Some(Value::Object(summaries)) = record
        .get_mut("metadata")
        .and_then(|m| m.get_mut("extracted"))
    {
        for summary in summaries.values_mut() {
            if let Value::Object(summary) = summary {
                summary.remove("extracted_at");
            }
        }
    }
}

/// Field-level differences between two versions of a record, ignoring timestamps
/// that move on every observation. Empty when only those moved.
fn diff(before: &ServiceRecord, after: &ServiceRecord) -> Map<String, Value> {
    let (Ok(Value::Object(mut old)), Ok(Value::Object(mut new))) =
        (serde_json::to_value(before), serde_json::to_value(after))
    else {
        return Map::new();
    };
    strip_volatile(&mut old);
    strip_volatile(&mut new);

    let mut changes = Map::new();
    for (key, value) in &new {
        if matches!(key.as_str(), "updated_at" | "last_seen") {
            continue;
        }
        let previous = old.get(key).unwrap_or(&Value::Null);
        if previous != value {
            changes.insert(key.clone(), json!({"from": previous, "to": value}));
        }
    }
    changes
}

fn search_text(record: &ServiceRecord) -> String {
    let mut text = vec![
        record.name.as_str(),
        record.service_type.as_str(),
        record.status.as_str(),
        record.source.as_str(),
    ];
    text.extend(record.tags.iter().map(String::as_str));
    text.extend(record.location.as_deref());
    text.extend(record.owner.as_deref());
    text.extend(record.version.as_deref());
    text.extend(record.metadata.get("description").and_then(Value::as_str));
    text.join(" ").to_lowercase()
}

/// In-memory records with six secondary indexes, mirrored write-through to a
/// [`ServiceStore`] with an append-only history.
///
/// All mutations run under one lock. Memory is authoritative: a failed store
/// write is logged and retried on the next mutation.
pub struct ServiceRegistry {
    config: RegistryConfig,
    priority: SourcePriority,
    store: Arc<dyn ServiceStore>,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("backend", &self.store.backend())
            .field("config", &self.config)
            .finish()
    }
}

impl ServiceRegistry {
    /// Open the store named by `config.database_url` and load its records.
    pub async fn open(config: RegistryConfig, priority: SourcePriority) -> RegistryResult<Self> {
        let store: Arc<dyn ServiceStore> = if config.uses_memory_store() {
            Arc::new(InMemoryStore::new())
        } else {
            Arc::new(
                SqliteStore::connect(
                    &config.database_url,
                    config.max_connections,
                    config.connect_timeout_secs,
                )
                .await?,
            )
        };
        Self::with_store(store, config, priority).await
    }

    pub async fn with_store(
        store: Arc<dyn ServiceStore>,
        config: RegistryConfig,
        priority: SourcePriority,
    ) -> RegistryResult<Self> {
        let mut state = RegistryState::default();
        for record in store.load_all().await? {
            state.insert(record);
        }
        info!(
            backend = store.backend(),
            services = state.records.len(),
            "Service registry loaded"
        );
        Ok(Self {
            config,
            priority,
            store,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Mirror pending mutations; stops at the first failure.
    async fn flush_dirty(&self, state: &mut RegistryState) {
        let pending: Vec<String> = state.dirty.iter().cloned().collect();
        for id in pending {
            let outcome = match state.records.get(&id) {
                Some(record) => self.store.upsert(record).await,
                None => self.store.delete(&id).await.map(|_| ()),
            };
            match outcome {
                Ok(()) => {
                    state.dirty.remove(&id);
                }
                Err(e) => {
                    error!(
                        service_id = %id,
                        pending = state.dirty.len(),
                        error = %e,
                        "Failed to persist service, will retry on next mutation"
                    );
                    return;
                }
            }
        }
    }

    async fn persist(&self, state: &mut RegistryState, id: &str) {
        state.dirty.insert(id.to_string());
        self.flush_dirty(state).await;
    }

    async fn log_history(&self, id: &str, action: HistoryAction, changes: Value) {
        let entry = HistoryEntry::new(id, action, changes);
        if let Err(e) = self.store.append_history(&entry).await {
            warn!(service_id = %id, action = action.as_str(), error = %e, "Failed to append history");
        }
    }

    /// Register one observation: merge into the record with the same dedup key,
    /// or create a new one.
    #[instrument(skip(self, record), fields(service = %record.name, source = %record.source))]
    pub async fn register(&self, mut record: ServiceRecord) -> RegistrationResult {
        if record.name.trim().is_empty() || record.service_type.trim().is_empty() {
            warn!("Rejected service without name or type");
            return RegistrationResult::error("Service name and type are required");
        }
        if record.id.is_empty() {
            record.id = record.dedup_key().stable_id();
        }

        let key = record.dedup_key();
        let mut state = self.state.lock().await;

        if let Some(existing_id) = state.by_key.get(&key).cloned() {
            let mut changes = Map::new();
            let priority = &self.priority;
            state.modify(&existing_id, |existing| {
                let before = existing.clone();
                existing.merge_observation(&record, priority);
                changes = diff(&before, existing);
                if changes.is_empty() {
                    existing.updated_at = before.updated_at;
                } else {
                    existing.updated_at = existing.updated_at.max(Utc::now());
                }
            });

            if changes.is_empty() {
                // Only last_seen moved; it reaches the store with the next flush.
                state.dirty.insert(existing_id.clone());
                debug!(service_id = %existing_id, "Service unchanged");
            } else {
                self.persist(&mut state, &existing_id).await;
                self.log_history(&existing_id, HistoryAction::Updated, Value::Object(changes))
                    .await;
                debug!(service_id = %existing_id, "Updated existing service");
            }
            return RegistrationResult::updated(existing_id, &record.name);
        }

        if let Some(owner) = state.records.get(&record.id) {
            let message = format!(
                "Service id {} already belongs to {}, not {}",
                record.id,
                owner.dedup_key(),
                key
            );
            warn!(service_id = %record.id, "Rejected duplicate id");
            return RegistrationResult::duplicate(record.id.clone(), message);
        }

        let id = record.id.clone();
        let name = record.name.clone();
        let created = json!({
            "name": record.name,
            "type": record.service_type,
            "source": record.source,
            "location": record.location,
        });
        state.insert(record);
        self.persist(&mut state, &id).await;
        self.log_history(&id, HistoryAction::Created, created).await;
        info!(service_id = %id, "Registered new service");
        RegistrationResult::created(id, &name)
    }

    pub async fn register_raw(&self, raw: RawService) -> RegistrationResult {
        self.register(ServiceRecord::from(raw)).await
    }

    #[instrument(skip(self))]
    pub async fn deregister(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = state.take(id) else {
            return false;
        };
        self.persist(&mut state, id).await;
        self.log_history(id, HistoryAction::Deregistered, json!({"name": record.name}))
            .await;
        info!(service_id = %id, "Deregistered service");
        true
    }

    pub async fn get(&self, id: &str) -> Option<ServiceRecord> {
        self.state.lock().await.records.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Records matching `filter`, ordered by name then id.
    pub async fn list(
        &self,
        filter: &ServiceFilter,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<ServiceRecord> {
        let state = self.state.lock().await;
        let mut matched: Vec<&ServiceRecord> = match state.indexes.candidates(filter) {
            Some(ids) => ids.iter().filter_map(|id| state.records.get(id)).collect(),
            None => state.records.values().collect(),
        };
        matched.retain(|r| filter.matches(r));
        matched.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        matched
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Case-insensitive search; every whitespace-separated term must appear in
    /// the name, type, status, source, tags, location, owner, version or
    /// description.
    pub async fn search(&self, query: &str) -> Vec<ServiceRecord> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let state = self.state.lock().await;
        let mut found: Vec<ServiceRecord> = state
            .records
            .values()
            .filter(|r| {
                let text = search_text(r);
                terms.iter().all(|t| text.contains(t.as_str()))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, id: &str, status: &str) -> bool {
        let mut state = self.state.lock().await;
        let mut previous = String::new();
        let updated = state
            .modify(id, |r| {
                previous = std::mem::replace(&mut r.status, status.to_string());
                r.updated_at = Utc::now();
            })
            .is_some();
        if !updated {
            return false;
        }
        self.persist(&mut state, id).await;
        self.log_history(
            id,
            HistoryAction::StatusUpdated,
            json!({"status": {"from": previous, "to": status}}),
        )
        .await;
        true
    }

    #[instrument(skip(self, result), fields(status = %result.status))]
    pub async fn update_health(&self, id: &str, result: HealthCheckResult) -> bool {
        let mut state = self.state.lock().await;
        let mut previous = None;
        let to = result.status;
        let updated = state
            .modify(id, |r| {
                previous = r.health_status;
                r.set_health(result);
                r.updated_at = Utc::now();
            })
            .is_some();
        if !updated {
            return false;
        }
        self.persist(&mut state, id).await;
        self.log_history(
            id,
            HistoryAction::HealthUpdated,
            json!({"health_status": {"from": previous, "to": to}}),
        )
        .await;
        true
    }

    /// Apply partial updates; unknown ids yield an `error` result.
    pub async fn bulk_update(&self, updates: Vec<BulkUpdate>) -> Vec<RegistrationResult> {
        let mut state = self.state.lock().await;
        let mut results = Vec::with_capacity(updates.len());
        let mut touched = Vec::new();

        for update in updates {
            let mut changes = Value::Null;
            let name = state.modify(&update.id, |r| {
                let before = r.clone();
                if let Some(status) = &update.status {
                    r.status = status.clone();
                }
                if let Some(owner) = &update.owner {
                    r.owner = Some(owner.clone());
                }
                for tag in &update.remove_tags {
                    r.tags.remove(tag);
                }
                r.tags.extend(update.add_tags.iter().cloned());
                if let Some(metadata) = &update.metadata {
                    deep_merge(&mut r.metadata, metadata);
                }
                r.updated_at = Utc::now();
                changes = Value::Object(diff(&before, r));
            });
            match name.map(|r| r.name.clone()) {
                Some(name) => {
                    state.dirty.insert(update.id.clone());
                    touched.push((update.id.clone(), changes));
                    results.push(RegistrationResult::updated(update.id, &name));
                }
                None => {
                    results.push(RegistrationResult::error(format!(
                        "Service not found: {}",
                        update.id
                    )));
                }
            }
        }

        self.flush_dirty(&mut state).await;
        for (id, changes) in touched {
            self.log_history(&id, HistoryAction::Updated, changes).await;
        }
        results
    }

    pub async fn cleanup_stale_services(&self) -> usize {
        self.cleanup_stale_services_at(Utc::now()).await
    }

    /// Remove every record whose `last_seen` is older than the configured age at `now`.
    #[instrument(skip(self))]
    pub async fn cleanup_stale_services_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.config.max_service_age();
        let mut state = self.state.lock().await;
        let stale: Vec<String> = state
            .records
            .values()
            .filter(|r| r.last_seen < cutoff)
            .map(|r| r.id.clone())
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(record) = state.take(&id) {
                state.dirty.insert(id.clone());
                removed.push(record);
            }
        }
        self.flush_dirty(&mut state).await;

        for record in &removed {
            self.log_history(
                &record.id,
                HistoryAction::Deregistered,
                json!({"reason": "stale", "last_seen": record.last_seen}),
            )
            .await;
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), cutoff = %cutoff, "Removed stale services");
        }
        removed.len()
    }

    pub async fn export(&self, format: ExportFormat) -> RegistryResult<String> {
        let mut records: Vec<ServiceRecord> =
            self.state.lock().await.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        export_records(&records, format)
    }

    /// Register every record in `data`; a malformed document is rejected whole.
    pub async fn import(
        &self,
        data: &str,
        format: ExportFormat,
    ) -> RegistryResult<Vec<RegistrationResult>> {
        let records = import_records(data, format)?;
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.register(record).await);
        }
        info!(format = %format, imported = results.len(), "Imported services");
        Ok(results)
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.lock().await;
        let mut by_health = HashMap::new();
        for record in state.records.values() {
            let key = record
                .health_status
                .map(|h| h.as_str())
                .unwrap_or("unchecked");
            *by_health.entry(key.to_string()).or_insert(0) += 1;
        }
        let validated = state.records.values().filter(|r| r.validated).count();
        let invalid = state
            .records
            .values()
            .filter(|r| r.validation_result.as_ref().is_some_and(|v| !v.is_valid))
            .count();

        RegistryStats {
            total_services: state.records.len(),
            by_type: state.indexes.counts(IndexDimension::Type),
            by_status: state.indexes.counts(IndexDimension::Status),
            by_source: state.indexes.counts(IndexDimension::Source),
            by_health,
            validated,
            invalid,
            oldest_last_seen: state.records.values().map(|r| r.last_seen).min(),
            newest_last_seen: state.records.values().map(|r| r.last_seen).max(),
            pending_writes: state.dirty.len(),
            backend: self.store.backend().to_string(),
        }
    }

    /// Most recent history entries for one service.
    pub async fn service_history(&self, id: &str, limit: usize) -> RegistryResult<Vec<HistoryEntry>> {
        Ok(self.store.history(id, limit).await?)
    }

    /// Retry pending store writes; returns how many remain.
    pub async fn flush(&self) -> usize {
        let mut state = self.state.lock().await;
        self.flush_dirty(&mut state).await;
        state.dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::{
        Endpoint, HealthStatus, ProbeKind, RegistrationAction, ServiceSource, ValidationResult,
    };
    use chrono::Duration;

    async fn registry_with(store: Arc<InMemoryStore>) -> ServiceRegistry {
        ServiceRegistry::with_store(store, RegistryConfig::in_memory(), SourcePriority::default())
            .await
            .unwrap()
    }

    async fn registry() -> ServiceRegistry {
        registry_with(Arc::new(InMemoryStore::new())).await
    }

    fn svc_a() -> RawService {
        RawService::new("svc-a", "node", ServiceSource::Local).with_location("/srv/svc-a")
    }

    async fn assert_indexes_consistent(registry: &ServiceRegistry) {
        let state = registry.state.lock().await;
        assert_eq!(state.indexes, RegistryIndexes::rebuild(state.records.values()));
        assert_eq!(state.by_key.len(), state.records.len());
    }

    #[tokio::test]
    async fn test_register_then_update_keeps_one_record() {
        let registry = registry().await;

        let first = registry.register_raw(svc_a()).await;
        assert_eq!(first.action, RegistrationAction::Created);

        let second = registry.register_raw(svc_a()).await;
        assert_eq!(second.action, RegistrationAction::Updated);
        assert_eq!(second.service_id, first.service_id);
        assert_eq!(registry.len().await, 1);
    }

    fn observed(validated_at: DateTime<Utc>) -> ServiceRecord {
        let mut record = ServiceRecord::from(svc_a());
        record.validated = true;
        record.validation_result = Some(ValidationResult {
            is_valid: true,
            issues: Vec::new(),
            warnings: Vec::new(),
            validated_at,
        });
        record.metadata.insert(
            "extracted".into(),
            json!({"config": {"confidence": 0.8, "data": {"port": 8080}, "extracted_at": validated_at}}),
        );
        record
    }

    #[tokio::test]
    async fn test_unchanged_observation_skips_history_and_write() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry_with(store.clone()).await;
        let start = Utc::now() - Duration::minutes(5);

        let id = registry.register(observed(start)).await.service_id.unwrap();
        let stored = store.get(&id).await.unwrap();

        let mut next = observed(Utc::now());
        next.last_seen = stored.last_seen + Duration::seconds(30);
        let again = registry.register(next).await;
        assert_eq!(again.action, RegistrationAction::Updated);

        let history = registry.service_history(&id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::Created);

        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.updated_at, stored.updated_at);
        assert_eq!(record.last_seen, stored.last_seen + Duration::seconds(30));
        assert_eq!(store.get(&id).await.unwrap().last_seen, stored.last_seen);

        assert_eq!(registry.flush().await, 0);
        assert_eq!(store.get(&id).await.unwrap().last_seen, record.last_seen);
    }

    #[tokio::test]
    async fn test_changed_observation_records_only_real_changes() {
        let registry = registry().await;
        let id = registry
            .register(observed(Utc::now() - Duration::minutes(5)))
            .await
            .service_id
            .unwrap();

        let mut changed = observed(Utc::now());
        changed.status = "stopped".into();
        registry.register(changed).await;

        let history = registry.service_history(&id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, HistoryAction::Updated);
        let changes = history[0].changes.as_object().unwrap();
        assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["status"]);
        assert_eq!(changes["status"]["to"], "stopped");
    }

    #[tokio::test]
    async fn test_observations_from_many_sources_collapse() {
        let registry = registry().await;
        let mut docker = RawService::new("api", "node", ServiceSource::Docker).with_status("running");
        docker.endpoints.push(Endpoint::http("localhost", 8080));
        let mut local = RawService::new("api", "node", ServiceSource::Local).with_tag("node");
        local.endpoints.push(Endpoint::http("localhost", 3000));
        let consul = RawService::new("api", "node", ServiceSource::Consul).with_tag("consul");

        registry.register_raw(local).await;
        registry.register_raw(docker).await;
        registry.register_raw(consul).await;

        let all = registry.list(&ServiceFilter::default(), None, 0).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].endpoints[0].port, Some(8080));
        assert_eq!(all[0].status, "running");
        assert!(all[0].tags.contains("node") && all[0].tags.contains("consul"));
        assert_indexes_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_error_and_duplicate_actions() {
        let registry = registry().await;
        let nameless = registry
            .register_raw(RawService::new("", "node", ServiceSource::Local))
            .await;
        assert_eq!(nameless.action, RegistrationAction::Error);

        let created = registry.register_raw(svc_a()).await;
        let mut impostor = ServiceRecord::from(RawService::new("other", "python", ServiceSource::Local));
        impostor.id = created.service_id.clone().unwrap();

        let result = registry.register(impostor).await;
        assert_eq!(result.action, RegistrationAction::Duplicate);
        assert_eq!(registry.get(&result.service_id.unwrap()).await.unwrap().name, "svc-a");
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let registry = registry().await;
        for name in ["c", "a", "b"] {
            registry
                .register_raw(RawService::new(name, "node", ServiceSource::Local).with_tag("web"))
                .await;
        }
        registry
            .register_raw(RawService::new("d", "python", ServiceSource::Local))
            .await;

        let node = registry.list(&ServiceFilter::by_type("node"), None, 0).await;
        let names: Vec<_> = node.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let page = registry.list(&ServiceFilter::by_type("node"), Some(1), 1).await;
        assert_eq!(page[0].name, "b");

        let tagged = ServiceFilter {
            tag: Some("web".into()),
            ..Default::default()
        };
        assert_eq!(registry.list(&tagged, None, 0).await.len(), 3);
    }

    #[tokio::test]
    async fn test_search_matches_all_terms() {
        let registry = registry().await;
        let mut raw = RawService::new("orders-api", "node", ServiceSource::Local);
        raw.metadata.insert("description".into(), json!("Handles Orders"));
        registry.register_raw(raw).await;
        registry
            .register_raw(RawService::new("billing", "python", ServiceSource::Local))
            .await;

        assert_eq!(registry.search("orders NODE").await.len(), 1);
        assert_eq!(registry.search("handles").await.len(), 1);
        assert!(registry.search("orders python").await.is_empty());
    }

    #[tokio::test]
    async fn test_status_and_health_updates_are_indexed_and_logged() {
        let registry = registry().await;
        let id = registry.register_raw(svc_a()).await.service_id.unwrap();

        assert!(registry.update_status(&id, "maintenance").await);
        assert!(
            registry
                .update_health(&id, HealthCheckResult::unhealthy(ProbeKind::Tcp, "refused"))
                .await
        );
        assert!(!registry.update_status("missing", "x").await);

        let maintenance = ServiceFilter {
            status: Some("maintenance".into()),
            ..Default::default()
        };
        assert_eq!(registry.list(&maintenance, None, 0).await.len(), 1);
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.health_status, Some(HealthStatus::Unhealthy));

        let history = registry.service_history(&id, 10).await.unwrap();
        let actions: Vec<_> = history.iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![
                HistoryAction::HealthUpdated,
                HistoryAction::StatusUpdated,
                HistoryAction::Created
            ]
        );
        assert_indexes_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_stale_records() {
        let registry = registry().await;
        let now = Utc::now();

        let mut old = svc_a();
        old.observed_at = now - Duration::days(8);
        registry.register_raw(old).await;
        registry
            .register_raw(RawService::new("fresh", "node", ServiceSource::Local))
            .await;

        assert_eq!(registry.cleanup_stale_services_at(now).await, 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.cleanup_stale_services_at(now).await, 0);
        assert_indexes_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        for format in [ExportFormat::Json, ExportFormat::Csv] {
            let source = registry().await;
            source.register_raw(svc_a()).await;
            let mut docker = RawService::new("web", "docker-service", ServiceSource::Docker);
            docker.endpoints.push(Endpoint::http("localhost", 80));
            source.register_raw(docker).await;

            let data = source.export(format).await.unwrap();
            let target = registry().await;
            let results = target.import(&data, format).await.unwrap();

            assert!(results.iter().all(|r| r.action == RegistrationAction::Created));
            let ids = |records: Vec<ServiceRecord>| {
                records
                    .into_iter()
                    .map(|r| (r.id, r.name, r.service_type))
                    .collect::<BTreeSet<_>>()
            };
            assert_eq!(
                ids(source.list(&ServiceFilter::default(), None, 0).await),
                ids(target.list(&ServiceFilter::default(), None, 0).await)
            );
        }
    }

    #[tokio::test]
    async fn test_store_failure_keeps_memory_and_retries() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry_with(store.clone()).await;

        store.set_unavailable(true);
        let created = registry.register_raw(svc_a()).await;
        assert_eq!(created.action, RegistrationAction::Created);
        assert_eq!(registry.len().await, 1);
        assert!(store.is_empty().await);
        assert_eq!(registry.stats().await.pending_writes, 1);

        store.set_unavailable(false);
        registry
            .register_raw(RawService::new("b", "node", ServiceSource::Local))
            .await;
        assert_eq!(store.len().await, 2);
        assert_eq!(registry.stats().await.pending_writes, 0);
    }

    #[tokio::test]
    async fn test_reload_rebuilds_indexes() {
        let store = Arc::new(InMemoryStore::new());
        {
            let registry = registry_with(store.clone()).await;
            registry.register_raw(svc_a()).await;
        }
        let reloaded = registry_with(store).await;
        assert_eq!(reloaded.len().await, 1);
        assert_eq!(
            reloaded.list(&ServiceFilter::by_type("node"), None, 0).await.len(),
            1
        );
        let again = reloaded.register_raw(svc_a()).await;
        assert_eq!(again.action, RegistrationAction::Updated);
        assert_indexes_consistent(&reloaded).await;
    }

    #[tokio::test]
    async fn test_bulk_update() {
        let registry = registry().await;
        let id = registry.register_raw(svc_a().with_tag("old")).await.service_id.unwrap();

        let results = registry
            .bulk_update(vec![
                BulkUpdate {
                    id: id.clone(),
                    owner: Some("team-a".into()),
                    add_tags: vec!["new".into()],
                    remove_tags: vec!["old".into()],
                    metadata: json!({"tier": "gold"}).as_object().cloned(),
                    ..Default::default()
                },
                BulkUpdate {
                    id: "missing".into(),
                    ..Default::default()
                },
            ])
            .await;

        assert_eq!(results[0].action, RegistrationAction::Updated);
        assert_eq!(results[1].action, RegistrationAction::Error);

        let owned = ServiceFilter {
            owner: Some("team-a".into()),
            ..Default::default()
        };
        let records = registry.list(&owned, None, 0).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].tags.contains("new") && !records[0].tags.contains("old"));
        assert_eq!(records[0].metadata["tier"], "gold");
        assert_indexes_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = registry().await;
        registry.register_raw(svc_a()).await;
        let mut web = RawService::new("web", "docker-service", ServiceSource::Docker);
        web.health_status = Some(HealthStatus::Healthy);
        registry.register_raw(web).await;

        let stats = registry.stats().await;
        assert_eq!(stats.total_services, 2);
        assert_eq!(stats.by_source["docker"], 1);
        assert_eq!(stats.by_health["healthy"], 1);
        assert_eq!(stats.by_health["unchecked"], 1);
        assert_eq!(stats.backend, "memory");
    }
}
