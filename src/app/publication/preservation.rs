//! Mirroring archived publications into the preservation repository
//!
//! The repository is a tree of containers (directories) and binaries
//! (files) addressed by path below its REST base:
//! `<namespace>/<project-id>/<encoded relative path>`. Containers are
//! checked before writing; a missing one (404 or 410) is created.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::mime::detect_media_type;
use crate::constants::preservation;
use crate::errors::{PreservationError, PreservationResult};

/// Characters left as-is in an encoded path segment
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// Bytes sampled for media type detection
const SNIFF_LEN: usize = 512;

/// Preservation repository connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservationConfig {
    pub base_url: String,
    pub namespace: String,
    pub rate_limit_rps: u32,
    pub request_timeout: Duration,
}

impl Default for PreservationConfig {
    fn default() -> Self {
        Self {
            base_url: preservation::DEFAULT_BASE_URL.to_string(),
            namespace: preservation::DEFAULT_NAMESPACE.to_string(),
            rate_limit_rps: preservation::DEFAULT_RATE_LIMIT_RPS,
            request_timeout: preservation::REQUEST_TIMEOUT,
        }
    }
}

/// Operations the mirror needs from a preservation repository
///
/// Paths are already encoded and relative to the repository base.
#[async_trait]
pub trait PreservationRepository: Send + Sync {
    /// Whether a resource exists at `path`
    async fn exists(&self, path: &str) -> PreservationResult<bool>;

    /// Create or replace a container
    async fn put_container(&self, path: &str) -> PreservationResult<()>;

    /// Create or replace a binary with the contents of `file`
    ///
    /// `size` is the file length in bytes; the content is streamed, never
    /// held in memory whole.
    async fn put_binary(
        &self,
        path: &str,
        media_type: &str,
        file: &Path,
        size: u64,
    ) -> PreservationResult<()>;
}

/// Replace brackets and percent-encode one path segment
pub fn encode_segment(segment: &str) -> String {
    let sanitized = segment.replace(['[', ']'], "-");
    utf8_percent_encode(&sanitized, SEGMENT).to_string()
}

/// Encode a relative path segment by segment
pub fn encode_relative_path(path: &Path) -> String {
    path.components()
        .map(|c| encode_segment(&c.as_os_str().to_string_lossy()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Counts from one mirror run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub containers: usize,
    pub binaries: usize,
    pub bytes: u64,
}

/// Walks an archived project and mirrors it into a repository
pub struct PreservationMirror<'a> {
    repository: &'a dyn PreservationRepository,
    namespace: &'a str,
}

impl<'a> PreservationMirror<'a> {
    pub fn new(repository: &'a dyn PreservationRepository, namespace: &'a str) -> Self {
        Self {
            repository,
            namespace,
        }
    }

    /// Create `path` unless it already exists
    async fn ensure_container(&self, path: &str) -> PreservationResult<bool> {
        if self.repository.exists(path).await? {
            return Ok(false);
        }
        self.repository.put_container(path).await?;
        debug!("Created container {}", path);
        Ok(true)
    }

    /// Mirror the tree at `archived_root` as `<namespace>/<project_id>`
    pub async fn mirror(&self, project_id: &str, archived_root: &Path) -> PreservationResult<MirrorReport> {
        let namespace = encode_segment(self.namespace);
        let project_base = format!("{}/{}", namespace, encode_segment(project_id));
        self.ensure_container(&namespace).await?;
        self.ensure_container(&project_base).await?;

        let mut report = MirrorReport::default();
        let mut stack: Vec<PathBuf> = vec![archived_root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|source| io_error(&dir, source))?;
            let mut children = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|source| io_error(&dir, source))?
            {
                children.push(entry.path());
            }
            children.sort();

            for child in children {
                let relative = child.strip_prefix(archived_root).unwrap_or(&child);
                let target = format!("{}/{}", project_base, encode_relative_path(relative));
                let metadata = tokio::fs::metadata(&child)
                    .await
                    .map_err(|source| io_error(&child, source))?;

                if metadata.is_dir() {
                    self.repository.put_container(&target).await?;
                    report.containers += 1;
                    stack.push(child);
                } else {
                    let head = read_head(&child)
                        .await
                        .map_err(|source| io_error(&child, source))?;
                    let media_type = detect_media_type(&child, &head);
                    report.bytes += metadata.len();
                    self.repository
                        .put_binary(&target, media_type, &child, metadata.len())
                        .await?;
                    report.binaries += 1;
                    debug!("Preserved {} as {}", target, media_type);
                }
            }
        }

        info!(
            "Mirrored {}: {} container(s), {} binaries",
            project_id, report.containers, report.binaries
        );
        Ok(report)
    }
}

/// First bytes of a file, for media type detection
async fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(head)
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> PreservationError {
    PreservationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredResource {
    Container,
    Binary { media_type: String, data: Bytes },
}

#[derive(Debug, Default)]
struct RepositoryState {
    resources: BTreeMap<String, StoredResource>,
    put_calls: usize,
    unavailable_for: u32,
}

/// Preservation repository held in process
#[derive(Debug, Default)]
pub struct MemoryPreservationRepository {
    state: Mutex<RepositoryState>,
}

impl MemoryPreservationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail as if the repository were overloaded
    pub fn fail_next(&self, count: u32) {
        self.lock().unavailable_for = count;
    }

    pub fn get(&self, path: &str) -> Option<StoredResource> {
        self.lock().resources.get(path).cloned()
    }

    /// Every stored path, sorted
    pub fn paths(&self) -> Vec<String> {
        self.lock().resources.keys().cloned().collect()
    }

    pub fn put_calls(&self) -> usize {
        self.lock().put_calls
    }

    pub fn is_empty(&self) -> bool {
        self.lock().resources.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(state: &mut RepositoryState) -> PreservationResult<()> {
        if state.unavailable_for > 0 {
            state.unavailable_for -= 1;
            return Err(PreservationError::ServerOverloaded);
        }
        Ok(())
    }
}

#[async_trait]
impl PreservationRepository for MemoryPreservationRepository {
    async fn exists(&self, path: &str) -> PreservationResult<bool> {
        let mut state = self.lock();
        Self::check(&mut state)?;
        Ok(state.resources.contains_key(path))
    }

    async fn put_container(&self, path: &str) -> PreservationResult<()> {
        let mut state = self.lock();
        Self::check(&mut state)?;
        state.put_calls += 1;
        state
            .resources
            .insert(path.to_string(), StoredResource::Container);
        Ok(())
    }

    async fn put_binary(
        &self,
        path: &str,
        media_type: &str,
        file: &Path,
        _size: u64,
    ) -> PreservationResult<()> {
        Self::check(&mut self.lock())?;
        let data = tokio::fs::read(file)
            .await
            .map_err(|source| io_error(file, source))?;
        let mut state = self.lock();
        state.put_calls += 1;
        state.resources.insert(
            path.to_string(),
            StoredResource::Binary {
                media_type: media_type.to_string(),
                data: data.into(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_segment_encoding() {
        assert_eq!(encode_segment("run [1].csv"), "run%20-1-.csv");
        assert_eq!(encode_segment("plain_name-2.txt"), "plain_name-2.txt");
        assert_eq!(
            encode_relative_path(Path::new("a b/[x]/c.txt")),
            "a%20b/-x-/c.txt"
        );
    }

    #[tokio::test]
    async fn test_mirror_creates_containers_and_binaries() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("PRJ-1");
        std::fs::create_dir_all(root.join("data [raw]")).unwrap();
        std::fs::write(root.join("readme.txt"), "hello").unwrap();
        std::fs::write(root.join("data [raw]/run.csv"), "a,b\n1,2\n").unwrap();

        let repository = MemoryPreservationRepository::new();
        let report = PreservationMirror::new(&repository, "publications_01")
            .mirror("PRJ-1", &root)
            .await
            .unwrap();

        assert_eq!(report.containers, 1);
        assert_eq!(report.binaries, 2);
        assert_eq!(
            repository.paths(),
            vec![
                "publications_01",
                "publications_01/PRJ-1",
                "publications_01/PRJ-1/data%20-raw-",
                "publications_01/PRJ-1/data%20-raw-/run.csv",
                "publications_01/PRJ-1/readme.txt",
            ]
        );
        assert_eq!(
            repository.get("publications_01/PRJ-1/data%20-raw-/run.csv"),
            Some(StoredResource::Binary {
                media_type: "text/csv".to_string(),
                data: Bytes::from_static(b"a,b\n1,2\n"),
            })
        );
    }

    #[tokio::test]
    async fn test_large_binary_is_sized_from_the_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("PRJ-4");
        std::fs::create_dir_all(&root).unwrap();
        let mut payload = b"%PDF-1.7\n".to_vec();
        payload.resize(3 * SNIFF_LEN + 17, b'x');
        std::fs::write(root.join("report.bin"), &payload).unwrap();

        let repository = MemoryPreservationRepository::new();
        let report = PreservationMirror::new(&repository, "ns")
            .mirror("PRJ-4", &root)
            .await
            .unwrap();

        assert_eq!(report.bytes, payload.len() as u64);
        match repository.get("ns/PRJ-4/report.bin") {
            Some(StoredResource::Binary { media_type, data }) => {
                assert_eq!(media_type, "application/pdf");
                assert_eq!(data.len(), payload.len());
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_existing_containers_are_not_recreated() {
        let temp = TempDir::new().unwrap();
        let repository = MemoryPreservationRepository::new();
        let mirror = PreservationMirror::new(&repository, "ns");

        mirror.mirror("PRJ-2", temp.path()).await.unwrap();
        assert_eq!(repository.put_calls(), 2);
        mirror.mirror("PRJ-2", temp.path()).await.unwrap();
        assert_eq!(repository.put_calls(), 2);
    }

    #[tokio::test]
    async fn test_repository_failure_propagates() {
        let temp = TempDir::new().unwrap();
        let repository = MemoryPreservationRepository::new();
        repository.fail_next(1);
        let err = PreservationMirror::new(&repository, "ns")
            .mirror("PRJ-3", temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PreservationError::ServerOverloaded));
    }
}
