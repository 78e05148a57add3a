//! Core task queue implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::TaskQueueConfig;
use super::state::QueueState;
use super::types::{FailureOutcome, QueueStats, TaskId, TaskRecord, TaskStatus};
use crate::app::index::{IndexDepth, SubtreeIndexer};
use crate::app::models::FileLocator;
use crate::app::tasks::Task;
use crate::errors::{ConfigError, QueueError, QueueResult, Result};

/// In-process multi-queue task store
///
/// Enqueuing never blocks on task execution: `submit` only records the task
/// and returns its id. Workers claim tasks with [`claim_next`](Self::claim_next)
/// and report back with [`mark_succeeded`](Self::mark_succeeded) or
/// [`mark_failed`](Self::mark_failed).
#[derive(Debug)]
pub struct TaskQueue {
    config: TaskQueueConfig,
    state: Arc<Mutex<QueueState>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            config: TaskQueueConfig::default(),
            state: Arc::new(Mutex::new(QueueState::new())),
        }
    }

    pub fn with_config(config: TaskQueueConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ConfigError::ValidationFailed { errors: vec![e] })?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(QueueState::new())),
        })
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Record a task on the queue it routes to
    pub async fn submit(&self, task: Task) -> QueueResult<TaskId> {
        let queue = task.queue();
        if !self.config.queues.iter().any(|q| q == queue) {
            return Err(QueueError::UnknownQueue {
                name: queue.to_string(),
            });
        }

        let mut state = self.state.lock().await;
        if state.active_count() >= self.config.max_pending_items {
            return Err(QueueError::QueueOverflow {
                capacity: self.config.max_pending_items,
            });
        }
        let operation = task.operation();
        let id = state.insert(task);
        info!(task_id = %id, queue, operation, "Submitted task");
        Ok(id)
    }

    /// Claim the next runnable task from one of `queues`
    ///
    /// Pending tasks are served first in submission order, then retries whose
    /// delay has elapsed.
    pub async fn claim_next(&self, queues: &[String], worker_id: u32) -> Option<TaskRecord> {
        let lock_start = std::time::Instant::now();
        let mut state = self.state.lock().await;
        let lock_duration = lock_start.elapsed();
        if lock_duration > Duration::from_millis(10) {
            debug!("Queue lock contention detected: {:?} wait time", lock_duration);
        }

        let id = match state.pop_pending(queues) {
            Some(id) => id,
            None => state.pop_due_retry(queues, Utc::now())?,
        };

        let record = state.get_mut(&id)?;
        record.status = TaskStatus::Running {
            worker_id,
            started_at: Utc::now(),
        };
        debug!("Worker {} claimed {} ({})", worker_id, id, record.task.operation());
        Some(record.clone())
    }

    pub async fn mark_succeeded(&self, id: TaskId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let record = Self::running_record(&mut state, id, "SUCCESS")?;
        record.status = TaskStatus::Succeeded {
            completed_at: Utc::now(),
        };
        state.record_outcome(true);
        debug!("Marked {} succeeded", id);
        Ok(())
    }

    /// Record a failed attempt and decide between retry and terminal failure
    ///
    /// A retry is scheduled only when `retryable` is set, the task declares a
    /// retry policy, and retries remain under that policy.
    pub async fn mark_failed(
        &self,
        id: TaskId,
        error: &str,
        retryable: bool,
    ) -> QueueResult<FailureOutcome> {
        let mut state = self.state.lock().await;
        let record = Self::running_record(&mut state, id, "FAILED")?;

        let policy = record.task.retry_policy();
        let retry_delay = match policy {
            Some(policy) if retryable && record.retries < policy.max_retries => {
                Some(self.config.effective_delay(policy.delay_for(record.retries)))
            }
            _ => None,
        };

        match retry_delay {
            Some(delay) => {
                record.retries += 1;
                record.task.record_retry();
                let not_before = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                record.status = TaskStatus::RetryScheduled {
                    not_before,
                    last_error: error.to_string(),
                };
                let attempt = record.retries;
                state.schedule_retry(id);
                warn!("Scheduled retry {} of {} in {:?}: {}", attempt, id, delay, error);
                Ok(FailureOutcome::RetryScheduled { attempt, delay })
            }
            None => {
                record.status = TaskStatus::Failed {
                    failed_at: Utc::now(),
                    error: error.to_string(),
                };
                let attempts = record.attempts();
                state.record_outcome(false);
                warn!("Marked {} failed after {} attempt(s): {}", id, attempts, error);
                Ok(FailureOutcome::Failed { attempts })
            }
        }
    }

    pub async fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.state.lock().await.get(&id).cloned()
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.stats()
    }

    /// No task is pending, running, or waiting for a retry
    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.is_finished()
    }

    /// Drop terminal records to free memory
    pub async fn cleanup(&self) -> usize {
        let removed = self.state.lock().await.cleanup();
        if removed > 0 {
            info!("Cleaned up {} finished task record(s)", removed);
        }
        removed
    }

    fn running_record<'a>(
        state: &'a mut QueueState,
        id: TaskId,
        to: &'static str,
    ) -> QueueResult<&'a mut TaskRecord> {
        let record = state
            .get_mut(&id)
            .ok_or(QueueError::TaskNotFound { task_id: id.0 })?;
        if !record.status.is_running() {
            return Err(QueueError::InvalidStateTransition {
                task_id: id.0,
                from: record.status.as_str(),
                to,
            });
        }
        Ok(record)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Index requests become `index_files` tasks on the indexing queue
#[async_trait]
impl SubtreeIndexer for TaskQueue {
    async fn index_subtree(&self, root: &FileLocator, depth: IndexDepth) -> Result<()> {
        self.submit(Task::IndexFiles {
            locator: root.clone(),
            depth,
        })
        .await?;
        Ok(())
    }
}
