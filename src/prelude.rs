//! Commonly used items in one import
//!
//! ```rust,no_run
//! use designsafe_tasks::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let queue = Arc::new(TaskQueue::with_config(TaskQueueConfig::default())?);
//!     queue.submit(Task::ReindexProjects).await?;
//!     Ok(())
//! }
//! ```

pub use crate::errors::{AppError, ErrorKind, Result};

pub use crate::app::{
    CopyReport, Dispatcher, DispatcherConfig, Environment, FileLocator, FileManager,
    FileManagerRegistry, IndexDepth, IndexerSync, MetadataService, Notification,
    NotificationStatus, Notifier, PipelineConfig, PublicationPipeline, PublicationStage, Resource,
    SearchIndex, Task, TaskContext, TaskQueue, TaskQueueConfig, TaskRunner, TransferTask,
    TreeCopier,
};

pub use crate::config::AppConfig;

pub use std::sync::Arc;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prelude_integration_pattern() {
        let queue = Arc::new(TaskQueue::with_config(TaskQueueConfig::for_testing()).unwrap());
        let id = queue.submit(Task::ReindexProjects).await.unwrap();

        let record = queue.get(id).await.unwrap();
        assert_eq!(record.queue, crate::constants::queues::API);
        assert_eq!(DispatcherConfig::default().worker_count, crate::constants::DEFAULT_WORKER_COUNT);
    }
}
