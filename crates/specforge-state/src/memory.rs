//! In-memory storage adapters
//!
//! Provides `MemoryRepository`, `MemoryEventLog`, and `MemoryProjectionStore`
//! that satisfy the trait contracts without any external dependencies. They
//! are the default backing for a single-process orchestrator; nothing
//! survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RepoState<T> {
    records: HashMap<String, T>,
    order: Vec<String>,
}

impl<T> Default for RepoState<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
        }
    }
}

/// In-memory repository backed by a `HashMap<id, T>` plus insertion order.
#[derive(Debug)]
pub struct MemoryRepository<T> {
    state: Mutex<RepoState<T>>,
}

impl<T> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RepoState::default()),
        }
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Repository<T> for MemoryRepository<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> StorageResult<Option<T>> {
        let state = self.state.lock().unwrap();
        Ok(state.records.get(id).cloned())
    }

    async fn put(&self, id: &str, value: T) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.records.insert(id.to_string(), value).is_none() {
            state.order.push(id.to_string());
        }
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<T>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryEventLog
// ---------------------------------------------------------------------------

/// In-memory append-only log backed by a `Vec<LogEntry>`.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, kind: &str, payload: serde_json::Value) -> StorageResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        let seq = entries.len() as u64 + 1;
        entries.push(LogEntry {
            seq,
            kind: kind.to_string(),
            payload,
            recorded_at: Utc::now(),
        });
        Ok(seq)
    }

    async fn read_from(
        &self,
        from_seq: u64,
        limit: Option<usize>,
    ) -> StorageResult<Vec<LogEntry>> {
        let entries = self.entries.lock().unwrap();
        let iter = entries.iter().filter(|e| e.seq >= from_seq).cloned();
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    async fn last_seq(&self) -> StorageResult<u64> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.last().map(|e| e.seq).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// MemoryProjectionStore
// ---------------------------------------------------------------------------

/// In-memory projection store keyed by `(name, id, tenant)`.
#[derive(Debug, Default)]
pub struct MemoryProjectionStore {
    states: Mutex<BTreeMap<ProjectionKey, serde_json::Value>>,
}

impl MemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for MemoryProjectionStore {
    async fn load(&self, key: &ProjectionKey) -> StorageResult<Option<serde_json::Value>> {
        let states = self.states.lock().unwrap();
        Ok(states.get(key).cloned())
    }

    async fn save(&self, key: &ProjectionKey, state: serde_json::Value) -> StorageResult<()> {
        let mut states = self.states.lock().unwrap();
        states.insert(key.clone(), state);
        Ok(())
    }

    async fn keys(&self, name: &str, tenant: Option<&str>) -> StorageResult<Vec<ProjectionKey>> {
        let states = self.states.lock().unwrap();
        Ok(states
            .keys()
            .filter(|k| k.name == name)
            .filter(|k| tenant.is_none() || k.tenant.as_deref() == tenant)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn repository_put_overwrites_without_reordering() {
        let repo = MemoryRepository::<u32>::new();
        repo.put("a", 1).await.unwrap();
        repo.put("b", 2).await.unwrap();
        repo.put("a", 3).await.unwrap();

        assert_eq!(repo.get("a").await.unwrap(), Some(3));
        assert_eq!(repo.list().await.unwrap(), vec![3, 2]);
    }

    #[tokio::test]
    async fn event_log_limit_applies_after_seq_filter() {
        let log = MemoryEventLog::new();
        for i in 0..5 {
            log.append("tick", json!({ "i": i })).await.unwrap();
        }

        let entries = log.read_from(3, Some(2)).await.unwrap();
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[tokio::test]
    async fn projection_keys_filter_by_tenant() {
        let store = MemoryProjectionStore::new();
        store
            .save(&ProjectionKey::new("summary", "1", Some("acme".into())), json!({}))
            .await
            .unwrap();
        store
            .save(&ProjectionKey::new("summary", "2", None), json!({}))
            .await
            .unwrap();

        assert_eq!(store.keys("summary", None).await.unwrap().len(), 2);
        let acme = store.keys("summary", Some("acme")).await.unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].id, "1");
    }
}
