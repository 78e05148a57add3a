//! Worker pool lifecycle
//!
//! The [`Dispatcher`] owns a set of [`TaskWorker`]s consuming the same
//! queues. It starts them, waits for the queue to drain when asked, and
//! shuts them down gracefully: workers finish the task they are running
//! before exiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::DispatcherConfig;
use super::worker::TaskWorker;
use crate::app::notify::Notifier;
use crate::app::queue::{QueueStats, TaskQueue};
use crate::app::tasks::TaskRunner;
use crate::errors::{QueueError, QueueResult};

/// Current state of the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    ShuttingDown,
    Shutdown,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<TaskQueue>,
    runner: Arc<dyn TaskRunner>,
    notifier: Arc<dyn Notifier>,
    worker_handles: Vec<JoinHandle<QueueResult<u64>>>,
    shutdown_senders: Vec<mpsc::Sender<()>>,
    state: PoolState,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("workers", &self.worker_handles.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<TaskQueue>,
        runner: Arc<dyn TaskRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            queue,
            runner,
            notifier,
            worker_handles: Vec::new(),
            shutdown_senders: Vec::new(),
            state: PoolState::Created,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Spawn all workers
    pub fn start(&mut self) -> QueueResult<()> {
        if self.state != PoolState::Created {
            return Err(QueueError::Pool {
                reason: format!("Cannot start pool in state: {:?}", self.state),
            });
        }
        self.config.validate()?;

        info!(
            "Starting {} workers on {:?}",
            self.config.worker_count, self.config.queues
        );

        for worker_id in 0..self.config.worker_count {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let worker = TaskWorker::new(
                worker_id as u32,
                &self.config,
                self.queue.clone(),
                self.runner.clone(),
                self.notifier.clone(),
                shutdown_rx,
            );

            self.worker_handles.push(tokio::spawn(worker.run()));
            self.shutdown_senders.push(shutdown_tx);
        }

        self.state = PoolState::Running;
        Ok(())
    }

    /// Wait until no task is pending, running, or scheduled for retry
    pub async fn wait_until_idle(&self, poll_interval: Duration) {
        while !self.queue.is_finished().await {
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Stop all workers after their current task; returns tasks executed
    pub async fn shutdown(mut self) -> QueueResult<u64> {
        if self.state == PoolState::Shutdown {
            return Ok(0);
        }
        if self.state != PoolState::Running {
            warn!("Shutting down pool in state: {:?}", self.state);
        }

        self.state = PoolState::ShuttingDown;
        info!("Shutting down worker pool");

        for shutdown_tx in self.shutdown_senders.drain(..) {
            let _ = shutdown_tx.send(()).await;
        }

        let mut tasks_run = 0;
        let mut error_count = 0;
        for handle in self.worker_handles.drain(..) {
            match handle.await {
                Ok(Ok(count)) => tasks_run += count,
                Ok(Err(e)) => {
                    debug!("Worker failed: {}", e);
                    error_count += 1;
                }
                Err(e) => {
                    debug!("Worker panicked: {}", e);
                    error_count += 1;
                }
            }
        }

        if error_count > 0 {
            warn!("{} workers encountered errors during shutdown", error_count);
        }

        self.state = PoolState::Shutdown;
        info!("Worker pool shutdown complete, {} task(s) executed", tasks_run);
        Ok(tasks_run)
    }

    /// Start, drain the queue, and shut down
    pub async fn run_until_idle(mut self) -> QueueResult<QueueStats> {
        self.start()?;
        self.wait_until_idle(self.config.idle_sleep).await;
        let queue = self.queue.clone();
        self.shutdown().await?;
        Ok(queue.stats().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::app::notify::MemoryNotifier;
    use crate::app::queue::TaskQueueConfig;
    use crate::app::tasks::Task;
    use crate::errors::Result;

    struct EchoRunner;

    #[async_trait]
    impl TaskRunner for EchoRunner {
        async fn run(&self, task: &Task) -> Result<String> {
            Ok(task.to_string())
        }
    }

    fn dispatcher(config: DispatcherConfig) -> Dispatcher {
        let queue = Arc::new(TaskQueue::with_config(TaskQueueConfig::for_testing()).unwrap());
        Dispatcher::new(config, queue, Arc::new(EchoRunner), Arc::new(MemoryNotifier::new()))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut pool = dispatcher(DispatcherConfig::for_testing());
        assert_eq!(pool.state(), PoolState::Created);

        pool.start().unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        assert!(pool.start().is_err());

        pool.queue().submit(Task::ReindexProjects).await.unwrap();
        pool.wait_until_idle(Duration::from_millis(5)).await;

        assert_eq!(pool.shutdown().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_until_idle_drains_all_queues() {
        let pool = dispatcher(DispatcherConfig::for_testing().with_worker_count(3));
        for i in 0..10 {
            pool.queue()
                .submit(Task::IndexOrUpdateProject {
                    project_uuid: format!("p-{i}"),
                })
                .await
                .unwrap();
        }
        pool.queue()
            .submit(Task::copy_public_to_mydata("alice", "PRJ-1", "alice"))
            .await
            .unwrap();

        let stats = pool.run_until_idle().await.unwrap();
        assert_eq!(stats.succeeded, 11);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let mut pool = dispatcher(DispatcherConfig::for_testing().with_worker_count(0));
        assert!(matches!(pool.start(), Err(QueueError::Pool { .. })));
        assert_eq!(pool.state(), PoolState::Created);
    }
}
