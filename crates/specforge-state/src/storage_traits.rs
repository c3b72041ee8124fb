//! Storage trait definitions for SpecForge
//!
//! These traits define the persistence contracts the orchestration core needs:
//! - `Repository`: keyed record storage (get/put/list)
//! - `EventLog`: append-only log keyed by a monotonically increasing sequence
//! - `ProjectionStore`: read-model state keyed by (name, id, tenant)
//!
//! All traits are async and backend-agnostic. In-memory adapters live in the
//! `memory` module; a durable JSON-lines event log lives in `file_log`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Repository: keyed record storage
// ---------------------------------------------------------------------------

/// Keyed record store.
///
/// Guarantees:
/// - `put` overwrites any previous value stored under the same id.
/// - `get` returns `Ok(None)` for unknown ids rather than an error.
/// - `list` returns records in first-insertion order.
#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Fetch a record by id.
    async fn get(&self, id: &str) -> StorageResult<Option<T>>;

    /// Insert or replace a record.
    async fn put(&self, id: &str, value: T) -> StorageResult<()>;

    /// List every stored record.
    async fn list(&self) -> StorageResult<Vec<T>>;
}

// ---------------------------------------------------------------------------
// EventLog: append-only, sequence-keyed
// ---------------------------------------------------------------------------

/// A single persisted log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number, starting at 1
    pub seq: u64,
    /// Entry kind (the event type string for bus-backed logs)
    pub kind: String,
    /// Serialized payload
    pub payload: serde_json::Value,
    /// When the entry was appended
    pub recorded_at: DateTime<Utc>,
}

/// Append-only event log.
///
/// Guarantees:
/// - Sequence numbers start at 1 and increase by exactly one per append.
/// - Entries are never modified or removed once appended.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an entry, returning its assigned sequence number.
    async fn append(&self, kind: &str, payload: serde_json::Value) -> StorageResult<u64>;

    /// Read entries with `seq >= from_seq`, ordered by seq.
    async fn read_from(&self, from_seq: u64, limit: Option<usize>)
        -> StorageResult<Vec<LogEntry>>;

    /// Sequence number of the last appended entry (0 when empty).
    async fn last_seq(&self) -> StorageResult<u64>;
}

// ---------------------------------------------------------------------------
// ProjectionStore: read models
// ---------------------------------------------------------------------------

/// Composite key for a projection record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectionKey {
    /// Projection name (e.g. "build-summary")
    pub name: String,
    /// Aggregate id within the projection
    pub id: String,
    /// Owning tenant, if any
    pub tenant: Option<String>,
}

impl ProjectionKey {
    pub fn new(name: impl Into<String>, id: impl Into<String>, tenant: Option<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            tenant,
        }
    }
}

impl std::fmt::Display for ProjectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "{}/{}@{}", self.name, self.id, tenant),
            None => write!(f, "{}/{}", self.name, self.id),
        }
    }
}

/// Projection (read model) store.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Load the current state for a key.
    async fn load(&self, key: &ProjectionKey) -> StorageResult<Option<serde_json::Value>>;

    /// Replace the state for a key.
    async fn save(&self, key: &ProjectionKey, state: serde_json::Value) -> StorageResult<()>;

    /// List every key under a projection name, optionally scoped to a tenant.
    async fn keys(&self, name: &str, tenant: Option<&str>) -> StorageResult<Vec<ProjectionKey>>;
}
