//! AI provider seam and its pool bookkeeping.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::task::TaskType;

/// A backend that executes AI work. Treated as a black box: the scheduler
/// only relies on the declared [`ProviderConfig`].
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Produce content (code, documentation, tests).
    async fn generate(
        &self,
        task_type: TaskType,
        input: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    /// Inspect content (analysis, security review).
    async fn analyze(
        &self,
        task_type: TaskType,
        input: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Declared properties of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub capabilities: BTreeSet<TaskType>,
    pub max_concurrent: usize,
    /// Lower values are preferred.
    pub priority: i32,
    pub avg_latency_ms: u64,
    pub cost_per_unit: f64,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, capabilities: impl IntoIterator<Item = TaskType>) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().collect(),
            max_concurrent: 1,
            priority: 0,
            avg_latency_ms: 0,
            cost_per_unit: 0.0,
        }
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn cost_per_unit(mut self, cost: f64) -> Self {
        self.cost_per_unit = cost;
        self
    }
}

/// Point-in-time view of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub id: String,
    pub capabilities: BTreeSet<TaskType>,
    pub max_concurrent: usize,
    pub current_load: usize,
    pub priority: i32,
    /// Declared latency until the first execution, then a running mean.
    pub avg_latency_ms: u64,
    pub cost_per_unit: f64,
    pub completed: u64,
    pub failed: u64,
}

pub(crate) struct ProviderSlot {
    pub(crate) config: ProviderConfig,
    pub(crate) provider: std::sync::Arc<dyn AiProvider>,
    pub(crate) current_load: usize,
    pub(crate) completed: u64,
    pub(crate) failed: u64,
    pub(crate) avg_latency_ms: u64,
}

/// Outcome of looking for a provider for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    Chosen(usize),
    /// Capable providers exist but all are at `max_concurrent`.
    Saturated,
    /// No registered provider accepts this task type.
    NoneCapable,
}

impl ProviderSlot {
    pub(crate) fn new(config: ProviderConfig, provider: std::sync::Arc<dyn AiProvider>) -> Self {
        let avg_latency_ms = config.avg_latency_ms;
        Self {
            config,
            provider,
            current_load: 0,
            completed: 0,
            failed: 0,
            avg_latency_ms,
        }
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.current_load < self.config.max_concurrent
    }

    pub(crate) fn record(&mut self, success: bool, latency_ms: u64) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        let n = self.completed + self.failed;
        self.avg_latency_ms = if n == 1 {
            latency_ms
        } else {
            (self.avg_latency_ms * (n - 1) + latency_ms) / n
        };
    }

    pub(crate) fn status(&self) -> ProviderStatus {
        ProviderStatus {
            id: self.config.id.clone(),
            capabilities: self.config.capabilities.clone(),
            max_concurrent: self.config.max_concurrent,
            current_load: self.current_load,
            priority: self.config.priority,
            avg_latency_ms: self.avg_latency_ms,
            cost_per_unit: self.config.cost_per_unit,
            completed: self.completed,
            failed: self.failed,
        }
    }
}

/// Pick a provider for `task_type`: lowest priority value, then lowest
/// current load, then earliest registration.
pub(crate) fn select(slots: &[ProviderSlot], task_type: TaskType) -> Selection {
    let mut capable = false;
    let mut best: Option<usize> = None;
    for (idx, slot) in slots.iter().enumerate() {
        if !slot.config.capabilities.contains(&task_type) {
            continue;
        }
        capable = true;
        if !slot.has_capacity() {
            continue;
        }
        best = match best {
            Some(b)
                if (slots[b].config.priority, slots[b].current_load)
                    <= (slot.config.priority, slot.current_load) =>
            {
                Some(b)
            }
            _ => Some(idx),
        };
    }
    match (best, capable) {
        (Some(idx), _) => Selection::Chosen(idx),
        (None, true) => Selection::Saturated,
        (None, false) => Selection::NoneCapable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Idle;

    #[async_trait]
    impl AiProvider for Idle {
        async fn generate(
            &self,
            _: TaskType,
            _: &serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn analyze(
            &self,
            _: TaskType,
            _: &serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn slot(id: &str, priority: i32, max: usize, load: usize) -> ProviderSlot {
        let mut s = ProviderSlot::new(
            ProviderConfig::new(id, [TaskType::Documentation])
                .priority(priority)
                .max_concurrent(max),
            Arc::new(Idle),
        );
        s.current_load = load;
        s
    }

    #[test]
    fn lowest_priority_value_wins() {
        let slots = vec![slot("a", 5, 2, 0), slot("b", 1, 2, 1), slot("c", 1, 2, 0)];
        assert_eq!(select(&slots, TaskType::Documentation), Selection::Chosen(2));
    }

    #[test]
    fn ties_go_to_earliest_registration() {
        let slots = vec![slot("a", 1, 2, 0), slot("b", 1, 2, 0)];
        assert_eq!(select(&slots, TaskType::Documentation), Selection::Chosen(0));
    }

    #[test]
    fn full_providers_are_skipped() {
        let slots = vec![slot("a", 0, 1, 1)];
        assert_eq!(select(&slots, TaskType::Documentation), Selection::Saturated);
        assert_eq!(select(&slots, TaskType::Analysis), Selection::NoneCapable);
    }

    #[test]
    fn latency_is_a_running_mean() {
        let mut s = slot("a", 0, 1, 0);
        s.record(true, 100);
        s.record(false, 200);
        assert_eq!(s.avg_latency_ms, 150);
        assert_eq!((s.completed, s.failed), (1, 1));
    }
}
