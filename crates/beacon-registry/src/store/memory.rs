//! Process-local store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use beacon_types::ServiceRecord;
use tokio::sync::RwLock;

use super::{HistoryEntry, ServiceStore};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, ServiceRecord>>,
    history: RwLock<Vec<HistoryEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until cleared, as an unreachable database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<ServiceRecord> {
        self.records.read().await.get(id).cloned()
    }
}

#[async_trait]
impl ServiceStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load_all(&self) -> StorageResult<Vec<ServiceRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn upsert(&self, record: &ServiceRecord) -> StorageResult<()> {
        self.check_writable()?;
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.check_writable()?;
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> StorageResult<()> {
        self.check_writable()?;
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn history(&self, service_id: &str, limit: usize) -> StorageResult<Vec<HistoryEntry>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.service_id == service_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
