//! Priority task scheduler.
//!
//! Tasks wait in a priority queue until the admission loop finds them a
//! provider. Admission is serialized: one loop, woken by enqueue, provider
//! release or a fallback tick, walks the queue once per wake and assigns
//! every task it can. Execution then runs concurrently, bounded by each
//! provider's `max_concurrent`.
//!
//! A task with no eligible provider (none accepts its type, or every one
//! that does is at `max_concurrent`) is retried once per tick until
//! `max_retries` is reached, then failed with a single `task.failed` event.

mod health;
mod provider;
mod queue;
mod stats;
mod task;

pub use health::{
    Alert, HealthSnapshot, HealthStatus, ModuleHealth, MODULE_EVENT_BUS, MODULE_PROVIDERS,
    MODULE_SCHEDULER,
};
pub use provider::{AiProvider, ProviderConfig, ProviderStatus};
pub use stats::{SchedulerStats, StatsSnapshot};
pub use task::{Task, TaskPriority, TaskRequest, TaskStatus, TaskType};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{panic_message, EventBus};
use crate::config::SchedulerConfig;
use crate::domain::event::{DomainEvent, EventPayload};
use health::AlertLog;
use provider::{ProviderSlot, Selection};
use queue::TaskQueue;

const EVENT_SOURCE: &str = "scheduler";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("task {task_id} is {status} and cannot be cancelled")]
    NotCancellable { task_id: String, status: TaskStatus },

    #[error("provider already registered: {provider_id}")]
    DuplicateProvider { provider_id: String },

    #[error("invalid provider {provider_id}: {reason}")]
    InvalidProvider { provider_id: String, reason: String },
}

struct TaskRecord {
    task: Task,
    queued_at: Instant,
    /// Earliest next admission attempt after a retry.
    not_before: Option<Instant>,
}

#[derive(Default)]
struct SchedulerState {
    queue: TaskQueue,
    tasks: HashMap<String, TaskRecord>,
    providers: Vec<ProviderSlot>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    bus: EventBus,
    state: Mutex<SchedulerState>,
    /// Wakes the admission loop.
    wake: Notify,
    /// Signalled whenever a task reaches a terminal status.
    finished: Notify,
    stats: SchedulerStats,
    alerts: Mutex<AlertLog>,
    health: RwLock<HealthSnapshot>,
    last_handler_failures: AtomicU64,
    shutdown: watch::Sender<bool>,
}

/// Releases a provider slot when dropped, whatever the task outcome.
struct LoadGuard {
    inner: Arc<SchedulerInner>,
    provider_index: usize,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            if let Some(slot) = state.providers.get_mut(self.provider_index) {
                slot.current_load = slot.current_load.saturating_sub(1);
            }
        }
        self.inner.wake.notify_one();
    }
}

struct Dispatch {
    task_id: String,
    task_type: TaskType,
    input: serde_json::Value,
    provider_id: String,
    provider: Arc<dyn AiProvider>,
    load: LoadGuard,
}

/// Priority scheduler over a pool of [`AiProvider`]s.
///
/// Tasks may be scheduled before [`TaskScheduler::start`]; they wait in the
/// queue until the admission loop runs. Dropping the scheduler stops its
/// background loops.
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, bus: EventBus) -> Self {
        let (shutdown, _) = watch::channel(false);
        let alert_capacity = config.alert_capacity;
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                bus,
                state: Mutex::new(SchedulerState::default()),
                wake: Notify::new(),
                finished: Notify::new(),
                stats: SchedulerStats::default(),
                alerts: Mutex::new(AlertLog::new(alert_capacity)),
                health: RwLock::new(HealthSnapshot::empty()),
                last_handler_failures: AtomicU64::new(0),
                shutdown,
            }),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Add a provider to the pool.
    pub fn register_provider(
        &self,
        config: ProviderConfig,
        provider: Arc<dyn AiProvider>,
    ) -> Result<(), SchedulerError> {
        if config.max_concurrent == 0 {
            return Err(SchedulerError::InvalidProvider {
                provider_id: config.id,
                reason: "max_concurrent must be at least 1".into(),
            });
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.providers.iter().any(|p| p.config.id == config.id) {
                return Err(SchedulerError::DuplicateProvider {
                    provider_id: config.id,
                });
            }
            info!(
                provider_id = %config.id,
                max_concurrent = config.max_concurrent,
                priority = config.priority,
                "provider registered"
            );
            state.providers.push(ProviderSlot::new(config, provider));
        }
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Queue a task and return its id.
    pub async fn schedule(&self, request: TaskRequest) -> String {
        let task_id = Uuid::new_v4().to_string();
        let task = Task::new(
            task_id.clone(),
            request,
            self.inner.config.default_max_retries,
        );
        let (task_type, priority) = (task.task_type, task.priority);
        {
            let mut state = self.inner.state.lock().unwrap();
            state.queue.push(priority, task_id.clone());
            state.tasks.insert(
                task_id.clone(),
                TaskRecord {
                    task,
                    queued_at: Instant::now(),
                    not_before: None,
                },
            );
        }
        self.inner.stats.inc_scheduled();
        debug!(task_id = %task_id, %task_type, %priority, "task queued");
        publish(
            &self.inner.bus,
            EventPayload::TaskQueued {
                task_id: task_id.clone(),
                task_type,
                priority,
            },
        )
        .await;
        self.inner.wake.notify_one();
        task_id
    }

    /// Cancel a queued task. Running and finished tasks cannot be cancelled.
    pub async fn cancel(&self, task_id: &str) -> Result<(), SchedulerError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            let record =
                state
                    .tasks
                    .get_mut(task_id)
                    .ok_or_else(|| SchedulerError::TaskNotFound {
                        task_id: task_id.to_string(),
                    })?;
            if !record.task.advance(TaskStatus::Cancelled) {
                return Err(SchedulerError::NotCancellable {
                    task_id: task_id.to_string(),
                    status: record.task.status,
                });
            }
            state.queue.remove(task_id);
        }
        self.inner.stats.inc_cancelled();
        info!(task_id, "task cancelled");
        publish(
            &self.inner.bus,
            EventPayload::TaskCancelled {
                task_id: task_id.to_string(),
            },
        )
        .await;
        self.inner.finished.notify_waiters();
        Ok(())
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        let state = self.inner.state.lock().unwrap();
        state.tasks.get(task_id).map(|r| r.task.clone())
    }

    /// Resolve once the task is completed, failed or cancelled.
    pub async fn wait_for(&self, task_id: &str) -> Result<Task, SchedulerError> {
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.task(task_id) {
                None => {
                    return Err(SchedulerError::TaskNotFound {
                        task_id: task_id.to_string(),
                    })
                }
                Some(task) if task.status.is_terminal() => return Ok(task),
                Some(_) => {}
            }
            notified.await;
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    pub fn providers(&self) -> Vec<ProviderStatus> {
        let state = self.inner.state.lock().unwrap();
        state.providers.iter().map(ProviderSlot::status).collect()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Emit the counters as one log event.
    pub fn flush_stats(&self) {
        self.inner.stats.flush();
    }

    /// Snapshot from the most recent heartbeat.
    pub fn health(&self) -> HealthSnapshot {
        self.inner.health.read().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.alerts.lock().unwrap().to_vec()
    }

    /// Recompute health now, as the heartbeat does.
    pub async fn check_health(&self) -> HealthSnapshot {
        heartbeat(&self.inner).await
    }

    /// Spawn the admission and heartbeat loops. Calling it again is a no-op.
    pub fn start(&self) {
        let mut loops = self.loops.lock().unwrap();
        if !loops.is_empty() {
            return;
        }
        loops.push(tokio::spawn(admission_loop(self.inner.clone())));
        loops.push(tokio::spawn(heartbeat_loop(self.inner.clone())));
        info!(
            tick_ms = self.inner.config.tick_interval_ms,
            heartbeat_ms = self.inner.config.heartbeat_interval_ms,
            "scheduler started"
        );
    }

    /// Stop the background loops. Running tasks finish on their own.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handles: Vec<_> = self.loops.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }
        self.inner.stats.flush();
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
    }
}

async fn publish(bus: &EventBus, payload: EventPayload) {
    if let Err(e) = bus.publish(DomainEvent::new(EVENT_SOURCE, payload)).await {
        warn!(error = %e, "failed to publish scheduler event");
    }
}

async fn admission_loop(inner: Arc<SchedulerInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut tick = tokio::time::interval(inner.config.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = inner.wake.notified() => {}
            _ = tick.tick() => {}
            _ = shutdown.changed() => break,
        }
        admit(&inner).await;
    }
    debug!("admission loop stopped");
}

async fn heartbeat_loop(inner: Arc<SchedulerInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut tick = tokio::time::interval(inner.config.heartbeat_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => break,
        }
        heartbeat(&inner).await;
    }
    debug!("heartbeat loop stopped");
}

/// One pass over the queue. Each queued task is considered at most once.
async fn admit(inner: &Arc<SchedulerInner>) {
    let now = Instant::now();
    let mut dispatches = Vec::new();
    let mut events = Vec::new();
    let mut exhausted = 0usize;
    {
        let mut guard = inner.state.lock().unwrap();
        let state = &mut *guard;
        for task_id in state.queue.ids() {
            let Some(record) = state.tasks.get_mut(&task_id) else {
                state.queue.remove(&task_id);
                continue;
            };
            if record.not_before.is_some_and(|t| t > now) {
                continue;
            }
            match provider::select(&state.providers, record.task.task_type) {
                Selection::Chosen(idx) => {
                    let slot = &mut state.providers[idx];
                    slot.current_load += 1;
                    let load = LoadGuard {
                        inner: inner.clone(),
                        provider_index: idx,
                    };
                    record.task.advance(TaskStatus::Running);
                    record.task.assigned_provider = Some(slot.config.id.clone());
                    let wait_ms = record.queued_at.elapsed().as_millis() as u64;
                    inner.stats.record_dispatch(wait_ms);
                    crate::obs::emit_task_dispatched(&task_id, &slot.config.id, wait_ms);
                    events.push(EventPayload::TaskStarted {
                        task_id: task_id.clone(),
                        provider_id: slot.config.id.clone(),
                        wait_ms,
                    });
                    dispatches.push(Dispatch {
                        task_id: task_id.clone(),
                        task_type: record.task.task_type,
                        input: record.task.input.clone(),
                        provider_id: slot.config.id.clone(),
                        provider: slot.provider.clone(),
                        load,
                    });
                    state.queue.remove(&task_id);
                }
                selection @ (Selection::Saturated | Selection::NoneCapable) => {
                    let task = &mut record.task;
                    if task.retry_count < task.max_retries {
                        task.retry_count += 1;
                        inner.stats.inc_retries();
                    }
                    state.queue.remove(&task_id);
                    if task.retry_count < task.max_retries {
                        debug!(
                            task_id = %task_id,
                            retry_count = task.retry_count,
                            saturated = selection == Selection::Saturated,
                            "no eligible provider, retrying"
                        );
                        record.not_before = Some(now + inner.config.tick_interval());
                        state.queue.push(task.priority, task_id.clone());
                    } else {
                        let reason = match selection {
                            Selection::Saturated => {
                                format!("every {} provider is at capacity", task.task_type)
                            }
                            _ => format!("no provider accepts {} tasks", task.task_type),
                        };
                        task.advance(TaskStatus::Failed);
                        task.error = Some(reason.clone());
                        inner.stats.inc_failed_unrun();
                        warn!(
                            task_id = %task_id,
                            retry_count = task.retry_count,
                            "task failed: retries exhausted"
                        );
                        events.push(EventPayload::TaskFailed {
                            task_id: task_id.clone(),
                            provider_id: None,
                            reason,
                            retry_count: task.retry_count,
                        });
                        exhausted += 1;
                    }
                }
            }
        }
    }

    for dispatch in dispatches {
        tokio::spawn(execute(inner.clone(), dispatch));
    }
    for payload in events {
        publish(&inner.bus, payload).await;
    }
    if exhausted > 0 {
        inner.finished.notify_waiters();
    }
}

async fn execute(inner: Arc<SchedulerInner>, dispatch: Dispatch) {
    let Dispatch {
        task_id,
        task_type,
        input,
        provider_id,
        provider,
        load,
    } = dispatch;

    let started = Instant::now();
    let call = async {
        if task_type.is_analysis() {
            provider.analyze(task_type, &input).await
        } else {
            provider.generate(task_type, &input).await
        }
    };
    let guarded = AssertUnwindSafe(call).catch_unwind();
    let outcome = match inner.config.task_timeout() {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => Ok(Err(anyhow::anyhow!(
                "timed out after {} ms",
                limit.as_millis()
            ))),
        },
        None => guarded.await,
    };
    let result = match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    };
    let execution_ms = started.elapsed().as_millis() as u64;
    let success = result.is_ok();
    let provider_index = load.provider_index;
    drop(load);

    {
        let mut state = inner.state.lock().unwrap();
        if let Some(slot) = state.providers.get_mut(provider_index) {
            slot.record(success, execution_ms);
        }
        if let Some(record) = state.tasks.get_mut(&task_id) {
            match &result {
                Ok(value) => {
                    record.task.output = Some(value.clone());
                    record.task.advance(TaskStatus::Completed);
                }
                Err(reason) => {
                    record.task.error = Some(reason.clone());
                    record.task.advance(TaskStatus::Failed);
                }
            }
        }
    }
    inner.stats.record_finish(success, execution_ms);
    crate::obs::emit_task_finished(&task_id, &provider_id, success, execution_ms);

    let payload = match result {
        Ok(_) => EventPayload::TaskCompleted {
            task_id,
            provider_id,
            execution_ms,
        },
        Err(reason) => {
            let retry_count = {
                let state = inner.state.lock().unwrap();
                state
                    .tasks
                    .get(&task_id)
                    .map(|r| r.task.retry_count)
                    .unwrap_or(0)
            };
            EventPayload::TaskFailed {
                task_id,
                provider_id: Some(provider_id),
                reason,
                retry_count,
            }
        }
    };
    publish(&inner.bus, payload).await;
    inner.finished.notify_waiters();
}

async fn heartbeat(inner: &Arc<SchedulerInner>) -> HealthSnapshot {
    let threshold = inner.config.queue_alert_threshold;
    let (depth, running, provider_health) = {
        let state = inner.state.lock().unwrap();
        let running = state
            .tasks
            .values()
            .filter(|r| r.task.status == TaskStatus::Running)
            .count();
        let total = state.providers.len();
        let saturated = state.providers.iter().filter(|p| !p.has_capacity()).count();
        let provider_health = if total == 0 {
            ModuleHealth::new(HealthStatus::Unhealthy, "no providers registered")
        } else if saturated == total {
            ModuleHealth::new(
                HealthStatus::Degraded,
                format!("all {total} providers at capacity"),
            )
        } else {
            ModuleHealth::new(
                HealthStatus::Healthy,
                format!("{} of {total} providers available", total - saturated),
            )
        };
        (state.queue.len(), running, provider_health)
    };

    let scheduler_health = if depth > threshold {
        ModuleHealth::new(
            HealthStatus::Degraded,
            format!("queue depth {depth} exceeds {threshold}"),
        )
    } else {
        ModuleHealth::new(
            HealthStatus::Healthy,
            format!("{depth} queued, {running} running"),
        )
    };

    let bus_stats = inner.bus.stats();
    let previous = inner
        .last_handler_failures
        .swap(bus_stats.handler_failures, Ordering::Relaxed);
    let bus_health = if bus_stats.handler_failures > previous {
        ModuleHealth::new(
            HealthStatus::Degraded,
            format!(
                "{} handler failures since last heartbeat",
                bus_stats.handler_failures - previous
            ),
        )
    } else {
        ModuleHealth::new(
            HealthStatus::Healthy,
            format!("{} events published", bus_stats.published),
        )
    };

    let mut snapshot = HealthSnapshot::empty();
    snapshot
        .modules
        .insert(MODULE_SCHEDULER.to_string(), scheduler_health);
    snapshot
        .modules
        .insert(MODULE_PROVIDERS.to_string(), provider_health);
    snapshot.modules.insert(MODULE_EVENT_BUS.to_string(), bus_health);
    *inner.health.write().unwrap() = snapshot.clone();

    if depth > threshold {
        warn!(depth, threshold, "queue depth exceeded");
        inner.alerts.lock().unwrap().push(Alert {
            raised_at: Utc::now(),
            module: MODULE_SCHEDULER.to_string(),
            message: format!("queue depth {depth} exceeds threshold {threshold}"),
        });
        publish(
            &inner.bus,
            EventPayload::QueueDepthExceeded { depth, threshold },
        )
        .await;
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_ms: 5,
            heartbeat_interval_ms: 1_000,
            queue_alert_threshold: 1,
            alert_capacity: 2,
            default_max_retries: 2,
            task_timeout_ms: Some(1_000),
        }
    }

    #[tokio::test]
    async fn cancel_only_applies_to_queued_tasks() {
        let scheduler = TaskScheduler::new(config(), EventBus::new(16));
        let id = scheduler
            .schedule(TaskRequest::new(TaskType::Documentation, json!({})))
            .await;
        scheduler.cancel(&id).await.unwrap();
        assert_eq!(scheduler.task(&id).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(scheduler.queue_depth(), 0);
        assert_eq!(
            scheduler.cancel(&id).await,
            Err(SchedulerError::NotCancellable {
                task_id: id.clone(),
                status: TaskStatus::Cancelled
            })
        );
        assert!(matches!(
            scheduler.cancel("missing").await,
            Err(SchedulerError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn queue_depth_alerts_are_bounded() {
        let bus = EventBus::new(64);
        let scheduler = TaskScheduler::new(config(), bus.clone());
        for _ in 0..3 {
            scheduler
                .schedule(TaskRequest::new(TaskType::Analysis, json!({})))
                .await;
        }
        for _ in 0..3 {
            scheduler.check_health().await;
        }
        let health = scheduler.health();
        assert_eq!(
            health.module(MODULE_SCHEDULER).unwrap().status,
            HealthStatus::Degraded
        );
        assert_eq!(
            health.module(MODULE_PROVIDERS).unwrap().status,
            HealthStatus::Unhealthy
        );
        assert_eq!(scheduler.alerts().len(), 2);
        assert_eq!(
            bus.event_history(Some("scheduler.queue_depth_exceeded"), 10)
                .len(),
            3
        );
    }

    #[test]
    fn zero_capacity_provider_rejected() {
        struct Never;
        #[async_trait::async_trait]
        impl AiProvider for Never {
            async fn generate(
                &self,
                _: TaskType,
                _: &serde_json::Value,
            ) -> anyhow::Result<serde_json::Value> {
                unreachable!()
            }
            async fn analyze(
                &self,
                _: TaskType,
                _: &serde_json::Value,
            ) -> anyhow::Result<serde_json::Value> {
                unreachable!()
            }
        }
        let scheduler = TaskScheduler::new(config(), EventBus::new(4));
        let err = scheduler
            .register_provider(
                ProviderConfig::new("p", [TaskType::Analysis]).max_concurrent(0),
                Arc::new(Never),
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidProvider { .. }));
    }
}
