//! Event bus fan-out, failure isolation and durable replay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use specforge_core::bus::{EventBus, WILDCARD};
use specforge_core::domain::{DomainEvent, EventError, EventPayload};
use specforge_state::{EventLog, FileEventLog, MemoryEventLog};

fn completed(job: &str) -> DomainEvent {
    DomainEvent::new(
        "pipeline",
        EventPayload::JobCompleted {
            job_id: job.into(),
            artifact_count: 3,
            duration_ms: 12,
        },
    )
    .with_correlation(job)
}

#[tokio::test]
async fn failing_and_panicking_handlers_do_not_block_others() {
    let bus = EventBus::new(16);
    let delivered = Arc::new(AtomicUsize::new(0));

    let _err = bus.subscribe_fn("build.job.completed", |_| async {
        Err(anyhow::anyhow!("projection offline"))
    });
    let _panic = bus.subscribe_fn(WILDCARD, |_| async { panic!("handler bug") });
    let counter = delivered.clone();
    let _ok = bus.subscribe_fn("build.job.completed", move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let invoked = bus.publish(completed("job-1")).await.unwrap();
    assert_eq!(invoked, 3);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    let stats = bus.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.handler_failures, 2);
}

#[tokio::test]
async fn history_filter_returns_latest_in_order() {
    let bus = EventBus::new(10);
    for i in 0..4 {
        bus.publish(completed(&format!("job-{i}"))).await.unwrap();
        bus.publish(DomainEvent::new(
            "scheduler",
            EventPayload::TaskCancelled {
                task_id: format!("t{i}"),
            },
        ))
        .await
        .unwrap();
    }
    let jobs: Vec<String> = bus
        .event_history(Some("build.job.completed"), 2)
        .into_iter()
        .filter_map(|e| e.payload.job_id().map(str::to_string))
        .collect();
    assert_eq!(jobs, vec!["job-2", "job-3"]);
}

#[tokio::test]
async fn custom_events_need_registration() {
    let bus = EventBus::new(4);
    let event = DomainEvent::new(
        "audit-extension",
        EventPayload::Custom {
            event_type: "audit.recorded".into(),
            data: json!({ "actor": "ci" }),
        },
    );
    assert!(matches!(
        bus.publish(event.clone()).await,
        Err(EventError::UnknownType { .. })
    ));

    bus.register_event_type("audit.recorded", 1, &["actor"]);
    assert_eq!(bus.publish(event).await, Ok(0));
}

#[tokio::test]
async fn replay_reads_back_from_memory_log() {
    let log = Arc::new(MemoryEventLog::new());
    let bus = EventBus::with_event_log(2, log.clone());
    for i in 0..3 {
        bus.publish(completed(&format!("job-{i}"))).await.unwrap();
    }
    // History is capped, the log is not.
    assert_eq!(bus.event_history(None, 10).len(), 2);
    assert_eq!(log.last_seq().await.unwrap(), 3);

    let replayed = bus.replay(2).await.unwrap();
    let jobs: Vec<&str> = replayed.iter().filter_map(|e| e.payload.job_id()).collect();
    assert_eq!(jobs, vec!["job-1", "job-2"]);
}

#[tokio::test]
async fn file_log_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let first = EventBus::with_event_log(8, Arc::new(FileEventLog::open(&path).await.unwrap()));
    let original = completed("job-a");
    first.publish(original.clone()).await.unwrap();
    drop(first);

    let reopened = EventBus::with_event_log(8, Arc::new(FileEventLog::open(&path).await.unwrap()));
    reopened.publish(completed("job-b")).await.unwrap();

    let replayed = reopened.replay(1).await.unwrap();
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[0], original);
    assert!(reopened.event_history(None, 10).len() == 1);
}

#[tokio::test]
async fn replay_without_log_is_empty() {
    let bus = EventBus::new(4);
    bus.publish(completed("job")).await.unwrap();
    assert!(bus.replay(1).await.unwrap().is_empty());
}
