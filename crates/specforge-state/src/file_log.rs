//! Durable append-only event log stored as JSON lines.
//!
//! Layout: one `LogEntry` per line, in sequence order. The next sequence
//! number is recovered from the file on open, so a log can be reopened after
//! a restart and keep appending.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{EventLog, LogEntry, StorageResult};

/// File-backed [`EventLog`].
pub struct FileEventLog {
    path: PathBuf,
    /// Last assigned sequence number; the lock also serializes appends.
    last_seq: Mutex<u64>,
}

impl FileEventLog {
    /// Open (or create) a log at `path`, scanning existing entries.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let last_seq = match fs::read_to_string(&path).await {
            Ok(contents) => parse_entries(&contents)?
                .last()
                .map(|e| e.seq)
                .unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StorageError::Io(e)),
        };

        debug!(path = %path.display(), last_seq, "opened file event log");
        Ok(Self {
            path,
            last_seq: Mutex::new(last_seq),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StorageResult<Vec<LogEntry>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => parse_entries(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

fn parse_entries(contents: &str) -> StorageResult<Vec<LogEntry>> {
    let mut entries: Vec<LogEntry> = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogEntry = serde_json::from_str(line).map_err(|e| StorageError::Corrupt {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        if let Some(prev) = entries.last() {
            if entry.seq != prev.seq + 1 {
                return Err(StorageError::Corrupt {
                    line: idx + 1,
                    reason: format!("sequence gap: {} follows {}", entry.seq, prev.seq),
                });
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, kind: &str, payload: serde_json::Value) -> StorageResult<u64> {
        let mut last_seq = self.last_seq.lock().await;
        let entry = LogEntry {
            seq: *last_seq + 1,
            kind: kind.to_string(),
            payload,
            recorded_at: Utc::now(),
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        *last_seq = entry.seq;
        Ok(entry.seq)
    }

    async fn read_from(
        &self,
        from_seq: u64,
        limit: Option<usize>,
    ) -> StorageResult<Vec<LogEntry>> {
        // Hold the append lock so a half-written line is never observed.
        let _guard = self.last_seq.lock().await;
        let iter = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.seq >= from_seq);
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    async fn last_seq(&self) -> StorageResult<u64> {
        Ok(*self.last_seq.lock().await)
    }
}
