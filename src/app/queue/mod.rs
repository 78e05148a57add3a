//! Task queue
//!
//! Named queues (`default`, `api`, `indexing`) holding submitted [`Task`]s,
//! with per-task retry policies and delay-based retry scheduling: a failed
//! task is parked with a `not_before` instant and claimed again once it
//! passes, so no worker ever sleeps on a retry.
//!
//! ```rust,no_run
//! use designsafe_tasks::app::queue::{TaskQueue, TaskQueueConfig};
//! use designsafe_tasks::app::tasks::Task;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = TaskQueue::with_config(TaskQueueConfig::default())?;
//! let id = queue.submit(Task::ReindexProjects).await?;
//!
//! let queues = vec!["api".to_string()];
//! if let Some(record) = queue.claim_next(&queues, 1).await {
//!     assert_eq!(record.id, id);
//!     queue.mark_succeeded(record.id).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`Task`]: crate::app::tasks::Task

pub mod config;
pub mod core;
pub mod retry;
pub mod state;
pub mod types;

pub use config::TaskQueueConfig;
pub use core::TaskQueue;
pub use retry::{Backoff, BackoffCalculator, RetryPolicy};
pub use types::{FailureOutcome, QueueStats, TaskId, TaskRecord, TaskStatus};
