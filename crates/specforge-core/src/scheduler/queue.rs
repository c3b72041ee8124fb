//! Priority-ordered admission queue of task ids.

use std::collections::VecDeque;

use super::task::TaskPriority;

/// FIFO within a priority, critical before high before normal before low.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    entries: VecDeque<(TaskPriority, String)>,
}

impl TaskQueue {
    /// Insert immediately before the first entry of lower priority.
    pub(crate) fn push(&mut self, priority: TaskPriority, task_id: String) {
        let pos = self
            .entries
            .iter()
            .position(|(p, _)| p.rank() > priority.rank())
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (priority, task_id));
    }

    pub(crate) fn remove(&mut self, task_id: &str) -> bool {
        match self.entries.iter().position(|(_, id)| id == task_id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Ids in admission order.
    pub(crate) fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(_, id)| id.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
