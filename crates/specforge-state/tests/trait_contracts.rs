//! Trait contract tests for Repository, EventLog, and ProjectionStore.
//!
//! These tests verify the behavioral contracts of the storage traits
//! against every shipped adapter. Any conforming implementation must pass.

use serde_json::json;
use specforge_state::storage_traits::*;
use specforge_state::{FileEventLog, MemoryEventLog, MemoryProjectionStore, MemoryRepository};

// ===========================================================================
// Repository contract tests
// ===========================================================================

#[tokio::test]
async fn repository_get_missing_returns_none() {
    let repo = MemoryRepository::<String>::new();
    assert_eq!(repo.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn repository_put_then_get_round_trip() {
    let repo = MemoryRepository::<String>::new();
    repo.put("job-1", "idle".to_string()).await.unwrap();
    assert_eq!(repo.get("job-1").await.unwrap().as_deref(), Some("idle"));
}

#[tokio::test]
async fn repository_list_preserves_first_insertion_order() {
    let repo = MemoryRepository::<u8>::new();
    for (id, v) in [("c", 3), ("a", 1), ("b", 2)] {
        repo.put(id, v).await.unwrap();
    }
    assert_eq!(repo.list().await.unwrap(), vec![3, 1, 2]);
}

// ===========================================================================
// EventLog contract tests
// ===========================================================================

async fn assert_log_contract(log: &dyn EventLog) {
    assert_eq!(log.last_seq().await.unwrap(), 0);

    let s1 = log.append("build.job.submitted", json!({ "job": 1 })).await.unwrap();
    let s2 = log.append("build.job.completed", json!({ "job": 1 })).await.unwrap();
    assert_eq!((s1, s2), (1, 2), "sequence must start at 1 and be gap-free");
    assert_eq!(log.last_seq().await.unwrap(), 2);

    let all = log.read_from(0, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].kind, "build.job.submitted");
    assert_eq!(all[1].payload, json!({ "job": 1 }));

    let tail = log.read_from(2, None).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].seq, 2);

    assert!(log.read_from(3, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn memory_event_log_satisfies_contract() {
    let log = MemoryEventLog::new();
    assert_log_contract(&log).await;
}

#[tokio::test]
async fn file_event_log_satisfies_contract() {
    let dir = tempfile::tempdir().unwrap();
    let log = FileEventLog::open(dir.path().join("events.jsonl"))
        .await
        .unwrap();
    assert_log_contract(&log).await;
}

#[tokio::test]
async fn concurrent_appends_yield_unique_sequences() {
    let log = std::sync::Arc::new(MemoryEventLog::new());
    let mut handles = Vec::new();
    for i in 0..16 {
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            log.append("tick", json!({ "i": i })).await.unwrap()
        }));
    }
    let mut seqs = Vec::new();
    for h in handles {
        seqs.push(h.await.unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=16).collect::<Vec<u64>>());
}

// ===========================================================================
// ProjectionStore contract tests
// ===========================================================================

#[tokio::test]
async fn projection_tenants_are_isolated() {
    let store = MemoryProjectionStore::new();
    let a = ProjectionKey::new("build-summary", "job-1", Some("tenant-a".into()));
    let b = ProjectionKey::new("build-summary", "job-1", Some("tenant-b".into()));

    store.save(&a, json!({ "stage": "completed" })).await.unwrap();

    assert_eq!(
        store.load(&a).await.unwrap(),
        Some(json!({ "stage": "completed" }))
    );
    assert_eq!(store.load(&b).await.unwrap(), None);
}

#[tokio::test]
async fn projection_save_replaces_state() {
    let store = MemoryProjectionStore::new();
    let key = ProjectionKey::new("build-summary", "job-2", None);
    store.save(&key, json!({ "v": 1 })).await.unwrap();
    store.save(&key, json!({ "v": 2 })).await.unwrap();
    assert_eq!(store.load(&key).await.unwrap(), Some(json!({ "v": 2 })));
    assert_eq!(key.to_string(), "build-summary/job-2");
}
