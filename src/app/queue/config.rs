//! Task queue configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{queues, workers};

/// Runtime configuration for [`TaskQueue`](super::TaskQueue)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Queue names accepted by `submit`
    pub queues: Vec<String>,
    /// Active (non-terminal) tasks allowed before submissions are rejected
    pub max_pending_items: usize,
    /// Upper bound applied to every policy delay; `None` keeps policy delays
    pub max_retry_delay: Option<Duration>,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            queues: vec![
                queues::DEFAULT.to_string(),
                queues::API.to_string(),
                queues::INDEXING.to_string(),
            ],
            max_pending_items: workers::MAX_PENDING_TASKS,
            max_retry_delay: None,
        }
    }
}

impl TaskQueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with retry delays short enough for tests and dry runs
    pub fn for_testing() -> Self {
        Self {
            max_retry_delay: Some(Duration::from_millis(10)),
            ..Self::default()
        }
    }

    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    pub fn with_max_pending_items(mut self, max_pending_items: usize) -> Self {
        self.max_pending_items = max_pending_items;
        self
    }

    /// Delay actually used for a retry
    pub fn effective_delay(&self, policy_delay: Duration) -> Duration {
        match self.max_retry_delay {
            Some(cap) => policy_delay.min(cap),
            None => policy_delay,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.queues.is_empty() {
            return Err("at least one queue must be configured".to_string());
        }
        if self.queues.iter().any(|q| q.trim().is_empty()) {
            return Err("queue names must not be empty".to_string());
        }
        if self.max_pending_items == 0 {
            return Err("max_pending_items must be greater than 0".to_string());
        }
        Ok(())
    }
}
