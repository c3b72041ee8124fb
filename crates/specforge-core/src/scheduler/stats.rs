//! Scheduler counters.
//!
//! Incremented silently on the hot path; [`SchedulerStats::flush`] emits the
//! current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct SchedulerStats {
    scheduled: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retries: AtomicU64,
    wait_ms_sum: AtomicU64,
    execution_ms_sum: AtomicU64,
}

/// Copy of the counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_scheduled: u64,
    pub total_dispatched: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
    pub wait_ms_sum: u64,
    pub execution_ms_sum: u64,
}

impl StatsSnapshot {
    pub fn avg_wait_ms(&self) -> u64 {
        self.wait_ms_sum.checked_div(self.total_dispatched).unwrap_or(0)
    }

    pub fn avg_execution_ms(&self) -> u64 {
        let finished = self.total_completed + self.total_failed;
        self.execution_ms_sum.checked_div(finished).unwrap_or(0)
    }
}

impl SchedulerStats {
    pub(crate) fn inc_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, wait_ms: u64) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.wait_ms_sum.fetch_add(wait_ms, Ordering::Relaxed);
    }

    pub(crate) fn record_finish(&self, success: bool, execution_ms: u64) {
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.execution_ms_sum
            .fetch_add(execution_ms, Ordering::Relaxed);
    }

    /// A task failed without ever running (retries exhausted).
    pub(crate) fn inc_failed_unrun(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_scheduled: self.scheduled.load(Ordering::Relaxed),
            total_dispatched: self.dispatched.load(Ordering::Relaxed),
            total_completed: self.completed.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
            total_cancelled: self.cancelled.load(Ordering::Relaxed),
            total_retries: self.retries.load(Ordering::Relaxed),
            wait_ms_sum: self.wait_ms_sum.load(Ordering::Relaxed),
            execution_ms_sum: self.execution_ms_sum.load(Ordering::Relaxed),
        }
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            total_scheduled = s.total_scheduled,
            total_dispatched = s.total_dispatched,
            total_completed = s.total_completed,
            total_failed = s.total_failed,
            total_cancelled = s.total_cancelled,
            total_retries = s.total_retries,
            avg_wait_ms = s.avg_wait_ms(),
            avg_execution_ms = s.avg_execution_ms(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_handle_zero_counts() {
        let stats = SchedulerStats::default();
        assert_eq!(stats.snapshot().avg_wait_ms(), 0);
        assert_eq!(stats.snapshot().avg_execution_ms(), 0);
    }

    #[test]
    fn execution_average_covers_failures() {
        let stats = SchedulerStats::default();
        stats.record_dispatch(10);
        stats.record_dispatch(30);
        stats.record_finish(true, 100);
        stats.record_finish(false, 300);
        let s = stats.snapshot();
        assert_eq!(s.avg_wait_ms(), 20);
        assert_eq!(s.avg_execution_ms(), 200);
        assert_eq!((s.total_completed, s.total_failed), (1, 1));
    }
}
