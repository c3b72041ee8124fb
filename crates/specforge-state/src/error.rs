//! Error types for specforge-state

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Record not found
    #[error("Record not found: {key}")]
    NotFound { key: String },

    /// Filesystem error from a durable adapter
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted log line could not be decoded
    #[error("Corrupt log entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}
