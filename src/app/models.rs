//! Data models shared across the task layer
//!
//! A [`FileLocator`] only means something relative to its [`Resource`]; the
//! core never compares locators across backends and never persists them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::retry;
use crate::errors::StorageError;

/// Storage backends the task layer can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    /// Primary science-gateway storage (private "My Data" and projects)
    Agave,
    /// Public storage
    Public,
    Box,
    Dropbox,
    #[serde(rename = "googledrive")]
    GoogleDrive,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Agave,
        Resource::Public,
        Resource::Box,
        Resource::Dropbox,
        Resource::GoogleDrive,
    ];

    /// Wire tag used in locators and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Agave => "agave",
            Resource::Public => "public",
            Resource::Box => "box",
            Resource::Dropbox => "dropbox",
            Resource::GoogleDrive => "googledrive",
        }
    }

    /// Third-party backends reached through a user's linked account
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Resource::Box | Resource::Dropbox | Resource::GoogleDrive
        )
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StorageError::UnknownResource { tag: s.to_string() })
    }
}

/// Whether a slash-separated path has a `.` or `..` segment
pub fn has_relative_segments(path: &str) -> bool {
    path.split('/').any(|segment| segment == "." || segment == "..")
}

/// Opaque identifier of a file or folder on one backend
///
/// The path is kept relative and slash-separated with no leading or trailing
/// slash; the empty path is the backend root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocator {
    pub resource: Resource,
    pub path: String,
}

impl FileLocator {
    pub fn new(resource: Resource, path: impl AsRef<str>) -> Self {
        let path = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self { resource, path }
    }

    pub fn root(resource: Resource) -> Self {
        Self {
            resource,
            path: String::new(),
        }
    }

    /// Parse the `resource:path` textual form
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        let (tag, path) = s.split_once(':').ok_or_else(|| StorageError::InvalidLocator {
            locator: s.to_string(),
            reason: "expected <resource>:<path>".to_string(),
        })?;
        let resource = tag.parse::<Resource>()?;
        let locator = Self::new(resource, path);
        locator.validate()?;
        Ok(locator)
    }

    /// Reject paths that would escape the backend root
    pub fn validate(&self) -> Result<(), StorageError> {
        if has_relative_segments(&self.path) {
            return Err(StorageError::InvalidLocator {
                locator: self.to_string(),
                reason: "relative path segments are not allowed".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Last path segment, empty for the root
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn parent(&self) -> Option<FileLocator> {
        if self.is_root() {
            return None;
        }
        let parent = match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        };
        Some(FileLocator::new(self.resource, parent))
    }

    pub fn join(&self, name: &str) -> FileLocator {
        if self.is_root() {
            FileLocator::new(self.resource, name)
        } else {
            FileLocator::new(self.resource, format!("{}/{}", self.path, name))
        }
    }

    /// Path relative to `ancestor`, if this locator lives under it
    pub fn strip_prefix(&self, ancestor: &FileLocator) -> Option<&str> {
        if self.resource != ancestor.resource {
            return None;
        }
        if ancestor.is_root() {
            return Some(&self.path);
        }
        if self.path == ancestor.path {
            return Some("");
        }
        self.path
            .strip_prefix(ancestor.path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

impl fmt::Display for FileLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.path)
    }
}

impl FromStr for FileLocator {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileLocator::parse(s)
    }
}

/// Whether an entry is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// A resolved file or folder as reported by a file manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub locator: FileLocator,
    pub kind: EntryKind,
    /// Size in bytes, zero for folders
    pub size: u64,
}

impl FileEntry {
    pub fn file(locator: FileLocator, size: u64) -> Self {
        Self {
            locator,
            kind: EntryKind::File,
            size,
        }
    }

    pub fn folder(locator: FileLocator) -> Self {
        Self {
            locator,
            kind: EntryKind::Folder,
            size: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.locator.name()
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// A user-requested copy between two backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    pub username: String,
    pub source: FileLocator,
    /// Destination folder; the source base name is created under it
    pub destination: FileLocator,
    /// Attempts already retried, bumped only by the queue
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TransferTask {
    pub fn new(username: impl Into<String>, source: FileLocator, destination: FileLocator) -> Self {
        Self {
            username: username.into(),
            source,
            destination,
            retry_count: 0,
            max_retries: retry::TRANSFER_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Operation label used in notifications and logs
    pub fn operation(&self) -> &'static str {
        match (self.source.resource, self.destination.resource) {
            (Resource::Public, Resource::Agave) => "copy_public_to_mydata",
            (Resource::Box, Resource::Agave) => "box_download",
            (Resource::Agave, Resource::Box) => "box_upload",
            (src, Resource::Agave) if src.is_external() => "external_resource_download",
            (Resource::Agave, dst) if dst.is_external() => "external_resource_upload",
            _ => "transfer",
        }
    }
}

/// Deployment environment; archive and preservation stages only act in production
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Deployments call production "default"
    #[serde(rename = "default", alias = "production")]
    Production,
    Staging,
    #[default]
    Dev,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "default",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
