//! Task worker
//!
//! A worker repeatedly claims the next runnable task from its queues, runs
//! it, and reports the outcome back to the queue. Panics inside a task body
//! are caught and treated as unclassified failures so one bad task cannot
//! take the worker down. Workers never wait on a specific task: a task whose
//! retry is not yet due is simply not claimable.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use crate::app::notify::{Notification, NotificationStatus, Notifier};
use crate::app::queue::{BackoffCalculator, FailureOutcome, TaskQueue, TaskRecord};
use crate::app::tasks::{Task, TaskRunner};
use crate::errors::{AppError, QueueResult};

pub struct TaskWorker {
    id: u32,
    queues: Vec<String>,
    idle_sleep: Duration,
    queue: Arc<TaskQueue>,
    runner: Arc<dyn TaskRunner>,
    notifier: Arc<dyn Notifier>,
    shutdown_rx: mpsc::Receiver<()>,
    shutdown_requested: bool,
    consecutive_empty_polls: u32,
    tasks_run: u64,
}

impl std::fmt::Debug for TaskWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWorker")
            .field("id", &self.id)
            .field("queues", &self.queues)
            .field("tasks_run", &self.tasks_run)
            .finish()
    }
}

impl TaskWorker {
    pub fn new(
        id: u32,
        config: &DispatcherConfig,
        queue: Arc<TaskQueue>,
        runner: Arc<dyn TaskRunner>,
        notifier: Arc<dyn Notifier>,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            id,
            queues: config.queues.clone(),
            idle_sleep: config.idle_sleep,
            queue,
            runner,
            notifier,
            shutdown_rx,
            shutdown_requested: false,
            consecutive_empty_polls: 0,
            tasks_run: 0,
        }
    }

    /// Run until shutdown; returns the number of tasks executed
    pub async fn run(mut self) -> QueueResult<u64> {
        info!("Worker {} starting on {:?}", self.id, self.queues);

        loop {
            if self.check_shutdown() {
                info!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.run_once().await {
                Ok(true) => {
                    if self.consecutive_empty_polls > 0 {
                        debug!(
                            "Worker {} found work after {} empty polls",
                            self.id, self.consecutive_empty_polls
                        );
                        self.consecutive_empty_polls = 0;
                    }
                }
                Ok(false) => self.handle_no_work_available().await,
                Err(e) => {
                    warn!("Worker {} failed to record a task outcome: {}", self.id, e);
                    self.handle_no_work_available().await;
                }
            }
        }

        info!("Worker {} shutting down after {} task(s)", self.id, self.tasks_run);
        Ok(self.tasks_run)
    }

    /// Claim and execute one task; `false` when nothing was runnable
    pub async fn run_once(&mut self) -> QueueResult<bool> {
        let record = match self.queue.claim_next(&self.queues, self.id).await {
            Some(record) => record,
            None => return Ok(false),
        };

        self.execute(record).await?;
        self.tasks_run += 1;
        Ok(true)
    }

    async fn execute(&self, record: TaskRecord) -> QueueResult<()> {
        let task = &record.task;

        if task.notifies_progress() && record.is_first_attempt() {
            self.notify(task, NotificationStatus::Info, format!("Starting {}", task));
        }

        let result = AssertUnwindSafe(self.runner.run(task))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(AppError::Panicked {
                    message: panic_message(payload),
                })
            });

        match result {
            Ok(message) => {
                self.queue.mark_succeeded(record.id).await?;
                debug!("Worker {} completed {}: {}", self.id, record.id, message);
                if task.notifies_progress() {
                    self.notify(task, NotificationStatus::Success, message);
                }
            }
            Err(e) => {
                let kind = e.kind();
                warn!(
                    task_id = %record.id,
                    user = task.username(),
                    kind = kind.as_str(),
                    "{} failed: {}",
                    task,
                    e
                );
                let outcome = self
                    .queue
                    .mark_failed(record.id, &e.to_string(), kind.is_retryable())
                    .await?;
                if let FailureOutcome::Failed { attempts } = outcome {
                    error!(
                        task_id = %record.id,
                        user = task.username(),
                        "Giving up on {} after {} attempt(s)",
                        task,
                        attempts
                    );
                    self.notify(
                        task,
                        NotificationStatus::Error,
                        format!("{} failed after {} attempt(s): {}", task, attempts, e),
                    );
                }
            }
        }
        Ok(())
    }

    fn notify(&self, task: &Task, status: NotificationStatus, message: String) {
        let notification = Notification::new(
            task.event_type(),
            status,
            task.operation(),
            message,
            task.username(),
        )
        .with_extra(task.notification_extra());
        self.notifier.emit(notification);
    }

    fn check_shutdown(&mut self) -> bool {
        if self.shutdown_requested {
            return true;
        }
        match self.shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => {
                self.shutdown_requested = true;
                true
            }
            Err(mpsc::error::TryRecvError::Empty) => false,
        }
    }

    async fn handle_no_work_available(&mut self) {
        self.consecutive_empty_polls = self.consecutive_empty_polls.saturating_add(1);
        let sleep_duration =
            BackoffCalculator::calculate_idle_duration(self.consecutive_empty_polls, self.idle_sleep);

        tokio::select! {
            _ = tokio::time::sleep(sleep_duration) => {}
            _ = self.shutdown_rx.recv() => {
                self.shutdown_requested = true;
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}
