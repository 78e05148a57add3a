//! Dispatcher configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{queues, workers};
use crate::errors::{QueueError, QueueResult};

/// Settings for one pool of workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of concurrent workers to spawn
    pub worker_count: usize,
    /// Queues the workers consume, in priority order
    pub queues: Vec<String>,
    /// Base sleep when no task is runnable
    pub idle_sleep: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: workers::DEFAULT_WORKER_COUNT,
            queues: vec![
                queues::DEFAULT.to_string(),
                queues::API.to_string(),
                queues::INDEXING.to_string(),
            ],
            idle_sleep: workers::IDLE_SLEEP,
        }
    }
}

impl DispatcherConfig {
    /// Fast polling for tests
    pub fn for_testing() -> Self {
        Self {
            worker_count: 2,
            idle_sleep: Duration::from_millis(5),
            ..Default::default()
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Restrict the pool to the given queues
    pub fn with_queues(mut self, queues: &[&str]) -> Self {
        self.queues = queues.iter().map(|q| q.to_string()).collect();
        self
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.worker_count == 0 {
            return Err(QueueError::Pool {
                reason: "Worker count cannot be zero".to_string(),
            });
        }

        if self.worker_count > workers::MAX_WORKER_COUNT {
            return Err(QueueError::Pool {
                reason: format!(
                    "Worker count ({}) exceeds maximum ({})",
                    self.worker_count,
                    workers::MAX_WORKER_COUNT
                ),
            });
        }

        if self.queues.is_empty() {
            return Err(QueueError::Pool {
                reason: "At least one queue must be consumed".to_string(),
            });
        }

        Ok(())
    }
}
