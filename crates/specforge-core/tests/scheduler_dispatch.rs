//! End-to-end scheduler behaviour: priority order, retry exhaustion,
//! provider release and failure isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use specforge_core::bus::EventBus;
use specforge_core::config::SchedulerConfig;
use specforge_core::domain::EventPayload;
use specforge_core::scheduler::{
    AiProvider, ProviderConfig, TaskPriority, TaskRequest, TaskScheduler, TaskStatus, TaskType,
};

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 5,
        heartbeat_interval_ms: 50,
        queue_alert_threshold: 100,
        alert_capacity: 10,
        default_max_retries: 3,
        task_timeout_ms: Some(500),
    }
}

/// Records the `name` field of every input, in execution order.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl AiProvider for Recorder {
    async fn generate(&self, _: TaskType, input: &Value) -> anyhow::Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push(input["name"].as_str().unwrap_or_default().to_string());
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "echo": input["name"] }))
    }

    async fn analyze(&self, task_type: TaskType, input: &Value) -> anyhow::Result<Value> {
        self.generate(task_type, input).await
    }
}

struct Failing;

#[async_trait]
impl AiProvider for Failing {
    async fn generate(&self, _: TaskType, _: &Value) -> anyhow::Result<Value> {
        anyhow::bail!("model overloaded")
    }

    async fn analyze(&self, _: TaskType, _: &Value) -> anyhow::Result<Value> {
        panic!("analyzer crashed")
    }
}

#[tokio::test]
async fn dispatch_follows_priority_then_arrival() {
    let bus = EventBus::new(256);
    let scheduler = TaskScheduler::new(fast_config(), bus.clone());
    let recorder = Arc::new(Recorder::default());
    scheduler
        .register_provider(
            ProviderConfig::new("solo", [TaskType::Documentation]).max_concurrent(1),
            recorder.clone(),
        )
        .unwrap();

    let mut ids = Vec::new();
    for (name, priority) in [
        ("low", TaskPriority::Low),
        ("critical", TaskPriority::Critical),
        ("high", TaskPriority::High),
    ] {
        // Generous retries: the two waiting tasks spend one per tick while "solo" is busy.
        let req = TaskRequest::new(TaskType::Documentation, json!({ "name": name }))
            .priority(priority)
            .max_retries(100);
        ids.push(scheduler.schedule(req).await);
    }

    scheduler.start();
    for id in &ids {
        let task = scheduler.wait_for(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.assigned_provider.as_deref(), Some("solo"));
    }
    scheduler.shutdown().await;

    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec!["critical", "high", "low"]
    );
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.providers()[0].current_load, 0);
    assert_eq!(scheduler.stats().total_completed, 3);
    assert_eq!(bus.event_history(Some("task.started"), 10).len(), 3);
}

#[tokio::test]
async fn unservable_task_fails_once_after_max_retries() {
    let bus = EventBus::new(256);
    let scheduler = TaskScheduler::new(fast_config(), bus.clone());
    scheduler
        .register_provider(
            ProviderConfig::new("docs-only", [TaskType::Documentation]),
            Arc::new(Recorder::default()),
        )
        .unwrap();
    scheduler.start();

    let id = scheduler
        .schedule(TaskRequest::new(TaskType::SecurityReview, json!({})).max_retries(4))
        .await;
    let task = scheduler.wait_for(&id).await.unwrap();
    scheduler.shutdown().await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 4);
    assert!(task.error.unwrap().contains("security-review"));

    let failures: Vec<_> = bus
        .event_history(Some("task.failed"), 100)
        .into_iter()
        .filter(|e| matches!(&e.payload, EventPayload::TaskFailed { task_id, .. } if *task_id == id))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(scheduler.stats().total_retries, 4);
}

#[tokio::test]
async fn provider_errors_and_panics_release_load() {
    let bus = EventBus::new(256);
    let scheduler = TaskScheduler::new(fast_config(), bus.clone());
    scheduler
        .register_provider(
            ProviderConfig::new("flaky", [TaskType::CodeGeneration, TaskType::Analysis])
                .max_concurrent(2),
            Arc::new(Failing),
        )
        .unwrap();
    scheduler.start();

    let gen = scheduler
        .schedule(TaskRequest::new(TaskType::CodeGeneration, json!({})))
        .await;
    let analysis = scheduler
        .schedule(TaskRequest::new(TaskType::Analysis, json!({})))
        .await;

    let gen = scheduler.wait_for(&gen).await.unwrap();
    let analysis = scheduler.wait_for(&analysis).await.unwrap();
    scheduler.shutdown().await;

    assert_eq!(gen.status, TaskStatus::Failed);
    assert_eq!(gen.error.as_deref(), Some("model overloaded"));
    assert_eq!(gen.retry_count, 0);
    assert_eq!(analysis.status, TaskStatus::Failed);
    assert!(analysis.error.unwrap().contains("analyzer crashed"));

    let status = &scheduler.providers()[0];
    assert_eq!(status.current_load, 0);
    assert_eq!(status.failed, 2);
}

/// Holds its only slot long enough for queued work to exhaust its retries.
struct Slow;

#[async_trait]
impl AiProvider for Slow {
    async fn generate(&self, _: TaskType, _: &Value) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!({ "done": true }))
    }

    async fn analyze(&self, task_type: TaskType, input: &Value) -> anyhow::Result<Value> {
        self.generate(task_type, input).await
    }
}

#[tokio::test]
async fn saturated_provider_consumes_retries_until_failure() {
    let bus = EventBus::new(64);
    let scheduler = TaskScheduler::new(fast_config(), bus.clone());
    scheduler
        .register_provider(
            ProviderConfig::new("solo", [TaskType::TestGeneration]).max_concurrent(1),
            Arc::new(Slow),
        )
        .unwrap();
    scheduler.start();

    let running = scheduler
        .schedule(TaskRequest::new(TaskType::TestGeneration, json!({})))
        .await;
    let starved = scheduler
        .schedule(TaskRequest::new(TaskType::TestGeneration, json!({})).max_retries(2))
        .await;

    let starved_task = scheduler.wait_for(&starved).await.unwrap();
    assert_eq!(starved_task.status, TaskStatus::Failed);
    assert_eq!(starved_task.retry_count, 2);
    assert!(starved_task.error.unwrap().contains("at capacity"));
    assert_eq!(
        scheduler.task(&running).unwrap().status,
        TaskStatus::Running
    );

    let running_task = scheduler.wait_for(&running).await.unwrap();
    scheduler.shutdown().await;
    assert_eq!(running_task.status, TaskStatus::Completed);

    let failures: Vec<_> = bus
        .event_history(Some("task.failed"), 100)
        .into_iter()
        .filter(|e| matches!(&e.payload, EventPayload::TaskFailed { task_id, .. } if *task_id == starved))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(scheduler.providers()[0].current_load, 0);
}

#[tokio::test]
async fn one_admission_pass_fills_every_free_slot() {
    let scheduler = TaskScheduler::new(
        SchedulerConfig {
            tick_interval_ms: 1_000,
            heartbeat_interval_ms: 1_000,
            ..fast_config()
        },
        EventBus::new(64),
    );
    scheduler
        .register_provider(
            ProviderConfig::new("wide", [TaskType::Analysis]).max_concurrent(3),
            Arc::new(Slow),
        )
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            scheduler
                .schedule(TaskRequest::new(TaskType::Analysis, json!({})))
                .await,
        );
    }
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    for id in &ids {
        assert_eq!(scheduler.task(id).unwrap().status, TaskStatus::Running);
    }
    assert_eq!(scheduler.providers()[0].current_load, 3);

    for id in &ids {
        assert_eq!(
            scheduler.wait_for(id).await.unwrap().status,
            TaskStatus::Completed
        );
    }
    scheduler.shutdown().await;
}

#[tokio::test]
async fn wait_for_unknown_task_errors() {
    let scheduler = TaskScheduler::new(fast_config(), EventBus::new(4));
    assert!(scheduler.wait_for("nope").await.is_err());
}
