//! In-process file manager
//!
//! Holds a tree in memory and can inject failures. Used for dry runs and by
//! the test suites of the copier, the dispatcher, and the task handlers.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use super::{bytes_stream, collect_stream, validate_entry_name, ByteStream, FileManager};
use crate::app::models::{FileEntry, FileLocator, Resource};
use crate::errors::{StorageError, StorageResult};

#[derive(Debug, Clone)]
enum Node {
    Folder,
    File(Bytes),
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: BTreeMap<String, Node>,
    transient_failures: u32,
    denied: HashSet<String>,
    vanished: HashSet<String>,
    list_calls: usize,
    write_calls: usize,
}

#[derive(Debug)]
pub struct MemoryFileManager {
    resource: Resource,
    state: Mutex<MemoryState>,
}

fn parent_path(path: &str) -> &str {
    path.rfind('/').map(|idx| &path[..idx]).unwrap_or("")
}

impl MemoryFileManager {
    pub fn new(resource: Resource) -> Self {
        let mut state = MemoryState::default();
        state.nodes.insert(String::new(), Node::Folder);
        Self {
            resource,
            state: Mutex::new(state),
        }
    }

    /// Builder form of [`add_file`](Self::add_file)
    pub fn with_file(self, path: &str, contents: impl Into<Bytes>) -> Self {
        self.add_file(path, contents);
        self
    }

    /// Builder form of [`add_folder`](Self::add_folder)
    pub fn with_folder(self, path: &str) -> Self {
        self.add_folder(path);
        self
    }

    /// Insert a file, creating missing parent folders
    pub fn add_file(&self, path: &str, contents: impl Into<Bytes>) {
        let locator = FileLocator::new(self.resource, path);
        let mut state = self.lock();
        Self::insert_parents(&mut state, &locator.path);
        state.nodes.insert(locator.path, Node::File(contents.into()));
    }

    /// Insert a folder, creating missing parent folders
    pub fn add_folder(&self, path: &str) {
        let locator = FileLocator::new(self.resource, path);
        let mut state = self.lock();
        Self::insert_parents(&mut state, &locator.path);
        state.nodes.insert(locator.path, Node::Folder);
    }

    /// Make the next `count` operations fail as if the backend were unreachable
    pub fn fail_next(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    /// Deny access to `path` and everything below it
    pub fn deny(&self, path: &str) {
        let locator = FileLocator::new(self.resource, path);
        self.lock().denied.insert(locator.path);
    }

    /// Keep `path` in listings but fail every direct access to it as missing
    pub fn vanish(&self, path: &str) {
        let locator = FileLocator::new(self.resource, path);
        self.lock().vanished.insert(locator.path);
    }

    pub fn remove(&self, path: &str) {
        let locator = FileLocator::new(self.resource, path);
        let prefix = format!("{}/", locator.path);
        self.lock()
            .nodes
            .retain(|key, _| key != &locator.path && !key.starts_with(&prefix));
    }

    pub fn contents(&self, path: &str) -> Option<Bytes> {
        let locator = FileLocator::new(self.resource, path);
        match self.lock().nodes.get(&locator.path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_folder(&self, path: &str) -> bool {
        let locator = FileLocator::new(self.resource, path);
        matches!(self.lock().nodes.get(&locator.path), Some(Node::Folder))
    }

    /// Every file path in the tree, sorted
    pub fn file_paths(&self) -> Vec<String> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Every folder path below the root, sorted
    pub fn folder_paths(&self) -> Vec<String> {
        self.lock()
            .nodes
            .iter()
            .filter(|(path, node)| !path.is_empty() && matches!(node, Node::Folder))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert_parents(state: &mut MemoryState, path: &str) {
        let mut current = parent_path(path);
        while !current.is_empty() {
            state
                .nodes
                .entry(current.to_string())
                .or_insert(Node::Folder);
            current = parent_path(current);
        }
    }

    /// Apply injected failures and access rules for one operation
    fn check(&self, state: &mut MemoryState, locator: &FileLocator) -> StorageResult<()> {
        if locator.resource != self.resource {
            return Err(StorageError::InvalidLocator {
                locator: locator.to_string(),
                reason: format!("file manager serves {}", self.resource),
            });
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(StorageError::Unavailable {
                resource: self.resource.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let denied = state.denied.iter().any(|d| {
            d.is_empty() || locator.path == *d || locator.path.starts_with(&format!("{d}/"))
        });
        if denied {
            return Err(StorageError::PermissionDenied {
                locator: locator.to_string(),
            });
        }
        if state.vanished.contains(&locator.path) {
            return Err(StorageError::NotFound {
                locator: locator.to_string(),
            });
        }
        Ok(())
    }

    fn entry(&self, state: &MemoryState, locator: &FileLocator) -> StorageResult<FileEntry> {
        match state.nodes.get(&locator.path) {
            Some(Node::Folder) => Ok(FileEntry::folder(locator.clone())),
            Some(Node::File(data)) => Ok(FileEntry::file(locator.clone(), data.len() as u64)),
            None => Err(StorageError::NotFound {
                locator: locator.to_string(),
            }),
        }
    }

    fn require_folder(&self, state: &MemoryState, locator: &FileLocator) -> StorageResult<()> {
        if self.entry(state, locator)?.is_folder() {
            Ok(())
        } else {
            Err(StorageError::NotAFolder {
                locator: locator.to_string(),
            })
        }
    }
}

#[async_trait]
impl FileManager for MemoryFileManager {
    fn resource(&self) -> Resource {
        self.resource
    }

    async fn stat(&self, locator: &FileLocator) -> StorageResult<FileEntry> {
        let mut state = self.lock();
        self.check(&mut state, locator)?;
        self.entry(&state, locator)
    }

    async fn list(
        &self,
        folder: &FileLocator,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<FileEntry>> {
        let mut state = self.lock();
        state.list_calls += 1;
        self.check(&mut state, folder)?;
        self.require_folder(&state, folder)?;

        let children = state
            .nodes
            .iter()
            .filter(|(path, _)| !path.is_empty() && parent_path(path) == folder.path)
            .skip(offset)
            .take(limit)
            .map(|(path, node)| {
                let locator = FileLocator::new(self.resource, path);
                match node {
                    Node::Folder => FileEntry::folder(locator),
                    Node::File(data) => FileEntry::file(locator, data.len() as u64),
                }
            })
            .collect();
        Ok(children)
    }

    async fn read(&self, file: &FileLocator) -> StorageResult<ByteStream> {
        let mut state = self.lock();
        self.check(&mut state, file)?;
        match state.nodes.get(&file.path) {
            Some(Node::File(data)) => Ok(bytes_stream(data.clone())),
            Some(Node::Folder) => Err(StorageError::NotAFile {
                locator: file.to_string(),
            }),
            None => Err(StorageError::NotFound {
                locator: file.to_string(),
            }),
        }
    }

    async fn write(
        &self,
        folder: &FileLocator,
        name: &str,
        data: ByteStream,
    ) -> StorageResult<FileLocator> {
        validate_entry_name(folder, name)?;
        {
            let mut state = self.lock();
            state.write_calls += 1;
            self.check(&mut state, folder)?;
            self.require_folder(&state, folder)?;
        }

        let contents = collect_stream(data).await?;
        let target = folder.join(name);

        let mut state = self.lock();
        if let Some(Node::Folder) = state.nodes.get(&target.path) {
            return Err(StorageError::NotAFile {
                locator: target.to_string(),
            });
        }
        state.nodes.insert(target.path.clone(), Node::File(contents));
        Ok(target)
    }

    async fn ensure_folder(
        &self,
        parent: &FileLocator,
        name: &str,
    ) -> StorageResult<FileLocator> {
        validate_entry_name(parent, name)?;
        let target = parent.join(name);
        let mut state = self.lock();
        self.check(&mut state, &target)?;
        self.require_folder(&state, parent)?;

        match state.nodes.get(&target.path) {
            Some(Node::Folder) => Ok(target),
            Some(Node::File(_)) => Err(StorageError::NotAFolder {
                locator: target.to_string(),
            }),
            None => {
                state.nodes.insert(target.path.clone(), Node::Folder);
                Ok(target)
            }
        }
    }
}
