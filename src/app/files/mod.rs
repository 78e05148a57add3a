//! FileManager capability set
//!
//! A [`FileManager`] gives the task layer a uniform view of one storage
//! backend: resolve a locator, list a folder page by page, stream bytes out
//! of a file and into a folder, and create folders idempotently.
//!
//! Backends are resolved once, at startup, into a [`FileManagerRegistry`];
//! task code asks the registry for a [`Resource`] and never dispatches on
//! strings.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use designsafe_tasks::app::files::{FileManagerRegistry, PosixFileManager};
//! use designsafe_tasks::app::models::{FileLocator, Resource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = FileManagerRegistry::new()
//!     .with(Arc::new(PosixFileManager::new(Resource::Agave, "/data/shared")));
//!
//! let fm = registry.get(Resource::Agave)?;
//! let page = fm.list(&FileLocator::new(Resource::Agave, "alice"), 100, 0).await?;
//! println!("{} entries", page.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::app::models::{FileEntry, FileLocator, Resource};
use crate::errors::{StorageError, StorageResult};

pub mod memory;
pub mod posix;

pub use memory::MemoryFileManager;
pub use posix::PosixFileManager;

/// Stream of file content chunks
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// Capability interface over one storage backend
///
/// Transient failures (unreachable backend, rate limiting) are returned to
/// the caller as [`StorageError`]s classified as transient; implementations
/// never retry or swallow them.
#[async_trait]
pub trait FileManager: Send + Sync + fmt::Debug {
    /// Backend this manager serves
    fn resource(&self) -> Resource;

    /// Resolve a locator to a file or folder entry
    async fn stat(&self, locator: &FileLocator) -> StorageResult<FileEntry>;

    /// List immediate children of a folder
    ///
    /// Returns at most `limit` entries starting at `offset`, in a stable
    /// order. A page shorter than `limit` is the last page.
    async fn list(
        &self,
        folder: &FileLocator,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<FileEntry>>;

    /// Stream the bytes of a file
    async fn read(&self, file: &FileLocator) -> StorageResult<ByteStream>;

    /// Write a stream as `name` inside `folder`, replacing any existing file
    async fn write(
        &self,
        folder: &FileLocator,
        name: &str,
        data: ByteStream,
    ) -> StorageResult<FileLocator>;

    /// Create `name` inside `parent` if absent and return its locator
    ///
    /// An existing folder is not an error.
    async fn ensure_folder(&self, parent: &FileLocator, name: &str)
        -> StorageResult<FileLocator>;
}

/// Wrap an in-memory buffer as a single-chunk stream
pub fn bytes_stream(data: Bytes) -> ByteStream {
    stream::once(async move { Ok(data) }).boxed()
}

/// Drain a stream into one buffer
pub async fn collect_stream(mut data: ByteStream) -> StorageResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = data.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Read a whole file through a file manager
pub async fn read_all(fm: &dyn FileManager, file: &FileLocator) -> StorageResult<Bytes> {
    let data = fm.read(file).await?;
    collect_stream(data).await
}

/// Reject entry names that would create nested or escaping paths
pub(crate) fn validate_entry_name(parent: &FileLocator, name: &str) -> StorageResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StorageError::InvalidLocator {
            locator: parent.join(name).to_string(),
            reason: format!("invalid entry name {name:?}"),
        });
    }
    Ok(())
}

/// Closed set of file managers, resolved once at startup
#[derive(Debug, Clone, Default)]
pub struct FileManagerRegistry {
    managers: HashMap<Resource, Arc<dyn FileManager>>,
}

impl FileManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager under the resource it reports
    pub fn with(mut self, manager: Arc<dyn FileManager>) -> Self {
        self.register(manager);
        self
    }

    pub fn register(&mut self, manager: Arc<dyn FileManager>) {
        let resource = manager.resource();
        if self.managers.insert(resource, manager).is_some() {
            debug!("Replaced file manager for {}", resource);
        }
    }

    /// Build POSIX-backed managers for every configured mount root
    pub fn from_roots<I>(roots: I) -> Self
    where
        I: IntoIterator<Item = (Resource, PathBuf)>,
    {
        roots.into_iter().fold(Self::new(), |registry, (resource, root)| {
            registry.with(Arc::new(PosixFileManager::new(resource, root)))
        })
    }

    pub fn get(&self, resource: Resource) -> StorageResult<Arc<dyn FileManager>> {
        self.managers
            .get(&resource)
            .cloned()
            .ok_or_else(|| StorageError::NotConfigured {
                resource: resource.to_string(),
            })
    }

    pub fn contains(&self, resource: Resource) -> bool {
        self.managers.contains_key(&resource)
    }

    pub fn resources(&self) -> Vec<Resource> {
        let mut resources: Vec<_> = self.managers.keys().copied().collect();
        resources.sort();
        resources
    }
}
