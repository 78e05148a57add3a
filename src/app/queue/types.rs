//! Core data structures for the task queue
//!
//! ```text
//! PENDING ──claim──► RUNNING ──ok──► SUCCESS
//!                      │  ▲
//!                 error│  │not_before reached
//!                      ▼  │
//!               RETRY_SCHEDULED
//!                      │
//!          no retries  ▼
//!          left ────► FAILED
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::tasks::Task;

/// Queue-assigned task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Status of a task in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting to be claimed by a worker
    Pending,
    /// Claimed by a worker
    Running {
        worker_id: u32,
        started_at: DateTime<Utc>,
    },
    /// Failed with a retryable error; claimable again once `not_before` passes
    RetryScheduled {
        not_before: DateTime<Utc>,
        last_error: String,
    },
    /// Finished successfully
    Succeeded { completed_at: DateTime<Utc> },
    /// Failed permanently
    Failed {
        failed_at: DateTime<Utc>,
        error: String,
    },
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running { .. } => "RUNNING",
            TaskStatus::RetryScheduled { .. } => "RETRY_SCHEDULED",
            TaskStatus::Succeeded { .. } => "SUCCESS",
            TaskStatus::Failed { .. } => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. } | TaskStatus::Failed { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running { .. })
    }

    /// Whether a retry-scheduled task may be claimed at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self {
            TaskStatus::RetryScheduled { not_before, .. } => *not_before <= now,
            _ => false,
        }
    }
}

/// A submitted task and its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task: Task,
    /// Queue the task was routed to
    pub queue: String,
    pub status: TaskStatus,
    /// Retries scheduled so far
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, task: Task) -> Self {
        let queue = task.queue().to_string();
        Self {
            id,
            task,
            queue,
            status: TaskStatus::Pending,
            retries: 0,
            created_at: Utc::now(),
        }
    }

    /// First execution, as opposed to a retry
    pub fn is_first_attempt(&self) -> bool {
        self.retries == 0
    }

    /// Attempts made so far, counting the running one
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// What the queue decided after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Task will run again after `delay`
    RetryScheduled { attempt: u32, delay: Duration },
    /// Task is terminally failed
    Failed { attempts: u32 },
}

impl FailureOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureOutcome::Failed { .. })
    }
}

/// Counters for the task queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_submitted: u64,
    pub pending: usize,
    pub running: usize,
    pub retry_scheduled: usize,
    pub succeeded: u64,
    pub failed: u64,
    /// Retries scheduled over the queue lifetime
    pub total_retries: u64,
}

impl QueueStats {
    /// Tasks not yet terminal
    pub fn active(&self) -> usize {
        self.pending + self.running + self.retry_scheduled
    }

    /// Success rate as a percentage of finished tasks
    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.failed;
        if finished == 0 {
            0.0
        } else {
            (self.succeeded as f64 / finished as f64) * 100.0
        }
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} submitted, {} pending, {} running, {} awaiting retry, {} succeeded, {} failed",
            self.total_submitted,
            self.pending,
            self.running,
            self.retry_scheduled,
            self.succeeded,
            self.failed
        )
    }
}
