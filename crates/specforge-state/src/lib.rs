//! SpecForge State: persistence contracts for the orchestration core
//!
//! The core never talks to a storage engine directly. It depends on the
//! contracts defined here and receives an adapter at construction time.
//!
//! ## Key Components
//!
//! - `Repository`: keyed record storage used for build jobs
//! - `EventLog`: append-only, sequence-keyed log that can back the event bus
//! - `ProjectionStore`: read models keyed by (name, id, tenant)
//! - `memory`: in-memory adapters (default, no durability)
//! - `FileEventLog`: durable JSON-lines event log

mod error;
pub mod file_log;
pub mod memory;
pub mod storage_traits;

pub use error::StorageError;
pub use file_log::FileEventLog;
pub use memory::{MemoryEventLog, MemoryProjectionStore, MemoryRepository};
pub use storage_traits::{
    EventLog, LogEntry, ProjectionKey, ProjectionStore, Repository, StorageResult,
};
