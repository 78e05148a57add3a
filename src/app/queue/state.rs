//! Internal state for the task queue
//!
//! Pending tasks sit in one FIFO per queue name. Tasks waiting out a retry
//! delay sit in a separate set and are picked up once their `not_before`
//! instant passes.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::types::{QueueStats, TaskId, TaskRecord, TaskStatus};
use crate::app::tasks::Task;

#[derive(Debug, Default)]
pub struct QueueState {
    pending: HashMap<String, VecDeque<TaskId>>,
    scheduled: Vec<TaskId>,
    records: HashMap<TaskId, TaskRecord>,
    next_id: u64,
    total_submitted: u64,
    total_retries: u64,
    succeeded: u64,
    failed: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new task and append it to its queue
    pub fn insert(&mut self, task: Task) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        let record = TaskRecord::new(id, task);
        self.pending
            .entry(record.queue.clone())
            .or_default()
            .push_back(id);
        debug!("Queued {} on {}", id, record.queue);
        self.records.insert(id, record);
        self.total_submitted += 1;
        id
    }

    /// Oldest pending task across `queues`, in the order given
    pub fn pop_pending(&mut self, queues: &[String]) -> Option<TaskId> {
        queues
            .iter()
            .find_map(|name| self.pending.get_mut(name).and_then(VecDeque::pop_front))
    }

    /// Earliest-due retry on one of `queues`
    pub fn pop_due_retry(&mut self, queues: &[String], now: DateTime<Utc>) -> Option<TaskId> {
        let records = &self.records;
        let position = self
            .scheduled
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| records.get(id).map(|record| (pos, record)))
            .filter(|(_, record)| queues.contains(&record.queue) && record.status.is_due(now))
            .min_by_key(|(_, record)| match &record.status {
                TaskStatus::RetryScheduled { not_before, .. } => *not_before,
                _ => now,
            })
            .map(|(pos, _)| pos)?;
        Some(self.scheduled.swap_remove(position))
    }

    pub fn schedule_retry(&mut self, id: TaskId) {
        self.scheduled.push(id);
        self.total_retries += 1;
    }

    pub fn record_outcome(&mut self, succeeded: bool) {
        if succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskRecord> {
        self.records.get_mut(id)
    }

    /// Tasks that are not yet terminal
    pub fn active_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| !record.status.is_terminal())
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.active_count() == 0
    }

    /// Drop terminal records
    pub fn cleanup(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.status.is_terminal());
        before - self.records.len()
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total_submitted: self.total_submitted,
            total_retries: self.total_retries,
            succeeded: self.succeeded,
            failed: self.failed,
            ..Default::default()
        };
        for record in self.records.values() {
            match record.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running { .. } => stats.running += 1,
                TaskStatus::RetryScheduled { .. } => stats.retry_scheduled += 1,
                TaskStatus::Succeeded { .. } | TaskStatus::Failed { .. } => {}
            }
        }
        stats
    }
}
