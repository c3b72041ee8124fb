//! In-process publish/subscribe event bus.
//!
//! `publish` validates the event against the [`EventTypeRegistry`], records
//! it in a capped history (and the durable [`EventLog`] when one is
//! attached), then fans it out to every matching handler concurrently.
//! Handler failures, errors and panics alike, are logged per handler and
//! never reach the publisher.
//!
//! Delivery is best-effort and in-memory: handlers subscribed at the moment
//! of publish receive the event exactly once, and there is no ordering
//! guarantee between concurrent `publish` calls.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, instrument, warn};

use specforge_state::{EventLog, StorageResult};

use crate::domain::event::{DomainEvent, EventError, EventTypeRegistry};

/// Subscribe to every event type.
pub const WILDCARD: &str = "*";

/// Receives published events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}

type HandlerList = Vec<(u64, Arc<dyn EventHandler>)>;

struct BusInner {
    subscribers: RwLock<HashMap<String, HandlerList>>,
    history: Mutex<VecDeque<DomainEvent>>,
    capacity: usize,
    types: RwLock<EventTypeRegistry>,
    log: Option<Arc<dyn EventLog>>,
    next_subscription: AtomicU64,
    published: AtomicU64,
    handler_failures: AtomicU64,
}

impl BusInner {
    fn remove(&self, event_type: &str, id: u64) {
        let mut subs = self.subscribers.write().unwrap();
        if let Some(list) = subs.get_mut(event_type) {
            list.retain(|(sid, _)| *sid != id);
            if list.is_empty() {
                subs.remove(event_type);
            }
        }
    }
}

/// Counters describing bus activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub handler_failures: u64,
    pub history_len: usize,
    pub subscribers: usize,
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    event_type: String,
    bus: Weak<BusInner>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the handler. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(inner) = self.bus.upgrade() {
                inner.remove(&self.event_type, self.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Typed publish/subscribe hub with bounded history.
///
/// Cheap to clone; clones share subscribers and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an in-memory bus keeping at most `history_capacity` events.
    pub fn new(history_capacity: usize) -> Self {
        Self::build(history_capacity, None)
    }

    /// Create a bus that also appends every published event to `log`.
    pub fn with_event_log(history_capacity: usize, log: Arc<dyn EventLog>) -> Self {
        Self::build(history_capacity, Some(log))
    }

    fn build(capacity: usize, log: Option<Arc<dyn EventLog>>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity,
                types: RwLock::new(EventTypeRegistry::new()),
                log,
                next_subscription: AtomicU64::new(1),
                published: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Register a custom event type so it can be published.
    pub fn register_event_type(&self, event_type: &str, version: u32, required_fields: &[&str]) {
        self.inner
            .types
            .write()
            .unwrap()
            .register_custom(event_type, version, required_fields);
    }

    /// Subscribe `handler` to `event_type`, or to everything with [`WILDCARD`].
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let event_type = event_type.into();
        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .write()
            .unwrap()
            .entry(event_type.clone())
            .or_default()
            .push((id, handler));
        debug!(event_type = %event_type, subscription = id, "handler subscribed");
        Subscription {
            id,
            event_type,
            bus: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Subscribe an async closure.
    pub fn subscribe_fn<F, Fut>(&self, event_type: impl Into<String>, f: F) -> Subscription
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(event_type, Arc::new(FnHandler(f)))
    }

    /// Publish an event to every current subscriber of its type plus wildcards.
    ///
    /// Returns the number of handlers invoked. Only validation can fail;
    /// handler and event-log failures are logged and swallowed.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = %event.id))]
    pub async fn publish(&self, event: DomainEvent) -> Result<usize, EventError> {
        self.inner.types.read().unwrap().validate(&event)?;

        {
            let mut history = self.inner.history.lock().unwrap();
            if self.inner.capacity > 0 {
                if history.len() == self.inner.capacity {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        if let Some(log) = &self.inner.log {
            match serde_json::to_value(&event) {
                Ok(value) => {
                    if let Err(e) = log.append(&event.event_type, value).await {
                        warn!(error = %e, "failed to append event to durable log");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize event for durable log"),
            }
        }

        let handlers: HandlerList = {
            let subs = self.inner.subscribers.read().unwrap();
            subs.get(event.event_type.as_str())
                .into_iter()
                .chain(subs.get(WILDCARD))
                .flatten()
                .cloned()
                .collect()
        };

        let count = handlers.len();
        let event_ref = &event;
        let outcomes = join_all(handlers.iter().map(|(id, handler)| async move {
            let outcome = AssertUnwindSafe(handler.handle(event_ref))
                .catch_unwind()
                .await;
            (*id, outcome)
        }))
        .await;

        for (id, outcome) in outcomes {
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
            warn!(subscription = id, error = %failure, "event handler failed");
        }

        Ok(count)
    }

    /// Most recent `limit` events (oldest first), optionally filtered by type.
    pub fn event_history(&self, event_type: Option<&str>, limit: usize) -> Vec<DomainEvent> {
        let history = self.inner.history.lock().unwrap();
        let mut picked: Vec<DomainEvent> = history
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }

    /// Re-read events from the durable log, starting at `from_seq`.
    ///
    /// Returns an empty list when no log is attached. Entries that do not
    /// decode as a [`DomainEvent`] are skipped with a warning.
    pub async fn replay(&self, from_seq: u64) -> StorageResult<Vec<DomainEvent>> {
        let Some(log) = &self.inner.log else {
            return Ok(Vec::new());
        };
        let entries = log.read_from(from_seq, None).await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry.payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(seq = entry.seq, error = %e, "skipping undecodable log entry");
                    None
                }
            })
            .collect())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
            history_len: self.inner.history.lock().unwrap().len(),
            subscribers: self
                .inner
                .subscribers
                .read()
                .unwrap()
                .values()
                .map(Vec::len)
                .sum(),
        }
    }
}

/// Render a caught panic payload for logs and error messages.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
