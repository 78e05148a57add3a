//! Task dispatching
//!
//! Workers pull tasks from named queues, run them through a
//! [`TaskRunner`](crate::app::tasks::TaskRunner), classify failures, and ask
//! the queue to schedule retries according to each task's retry policy.
//! User-triggered tasks get INFO/SUCCESS notifications; every task that
//! fails terminally gets an ERROR notification.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use designsafe_tasks::app::dispatcher::{Dispatcher, DispatcherConfig};
//! use designsafe_tasks::app::notify::TracingNotifier;
//! use designsafe_tasks::app::queue::TaskQueue;
//! use designsafe_tasks::app::tasks::TaskRunner;
//!
//! # async fn example(runner: Arc<dyn TaskRunner>) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Arc::new(TaskQueue::new());
//! let dispatcher = Dispatcher::new(
//!     DispatcherConfig::default(),
//!     queue,
//!     runner,
//!     Arc::new(TracingNotifier),
//! );
//! let stats = dispatcher.run_until_idle().await?;
//! println!("{}", stats);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pool;
pub mod signals;
pub mod worker;

pub use config::DispatcherConfig;
pub use pool::{Dispatcher, PoolState};
pub use signals::{create_shutdown_channel, wait_for_shutdown_signal, SignalHandler};
pub use worker::TaskWorker;
