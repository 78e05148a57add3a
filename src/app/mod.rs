//! Core application logic for the DesignSafe task layer
//!
//! Storage backends sit behind the [`files::FileManager`] capability set;
//! [`copier`] and [`index`] build on it. Work is expressed as
//! [`tasks::Task`] values routed through [`queue`] and executed by the
//! [`dispatcher`] workers, with outcomes reported through [`notify`]. The
//! [`publication`] module holds the multi-stage publication pipeline.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use designsafe_tasks::app::{FileLocator, FileManagerRegistry, Resource, TaskQueue, TreeCopier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let files = Arc::new(FileManagerRegistry::from_roots([
//!     (Resource::Public, "/data/public".into()),
//!     (Resource::Agave, "/data/shared".into()),
//! ]));
//! let queue = Arc::new(TaskQueue::new());
//! let copier = TreeCopier::new(files, queue);
//!
//! let report = copier
//!     .copy(
//!         &FileLocator::new(Resource::Public, "NEES-1/data"),
//!         &FileLocator::new(Resource::Agave, "alice"),
//!     )
//!     .await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod copier;
pub mod dispatcher;
pub mod files;
pub mod index;
pub mod models;
pub mod notify;
pub mod publication;
pub mod queue;
pub mod tasks;

pub use copier::{CopyReport, TreeCopier};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use files::{FileManager, FileManagerRegistry, MemoryFileManager, PosixFileManager};
pub use index::{IndexDepth, IndexerSync, MemorySearchIndex, SearchIndex, SubtreeIndexer};
pub use models::{Environment, FileEntry, FileLocator, Resource, TransferTask};
pub use notify::{Notification, NotificationStatus, Notifier};
pub use publication::{PipelineConfig, PublicationPipeline, PublicationStage};
pub use queue::{TaskQueue, TaskQueueConfig};
pub use tasks::{MetadataService, Task, TaskContext, TaskRunner};
