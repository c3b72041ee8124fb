//! Heartbeat health snapshots and the alert ring.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MODULE_SCHEDULER: &str = "scheduler";
pub const MODULE_PROVIDERS: &str = "providers";
pub const MODULE_EVENT_BUS: &str = "event-bus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHealth {
    pub status: HealthStatus,
    pub detail: String,
}

impl ModuleHealth {
    pub fn new(status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub checked_at: DateTime<Utc>,
    pub modules: BTreeMap<String, ModuleHealth>,
}

impl HealthSnapshot {
    pub fn empty() -> Self {
        Self {
            checked_at: Utc::now(),
            modules: BTreeMap::new(),
        }
    }

    /// Worst status across modules.
    pub fn overall(&self) -> HealthStatus {
        self.modules
            .values()
            .map(|m| m.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleHealth> {
        self.modules.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub raised_at: DateTime<Utc>,
    pub module: String,
    pub message: String,
}

/// Bounded alert history; the oldest alert is dropped when full.
#[derive(Debug)]
pub(crate) struct AlertLog {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, alert: Alert) {
        if self.alerts.len() == self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    pub(crate) fn to_vec(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }
}
