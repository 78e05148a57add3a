//! File manager over a mounted directory tree
//!
//! Primary and public storage are reachable as POSIX mounts on the task
//! hosts; any other backend synced to a local directory can be served the
//! same way.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::{validate_entry_name, ByteStream, FileManager};
use crate::app::models::{FileEntry, FileLocator, Resource};
use crate::constants::{listing, modes};
use crate::errors::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct PosixFileManager {
    resource: Resource,
    root: PathBuf,
}

impl PosixFileManager {
    pub fn new(resource: Resource, root: impl Into<PathBuf>) -> Self {
        Self {
            resource,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a locator onto the mounted tree
    pub fn real_path(&self, locator: &FileLocator) -> StorageResult<PathBuf> {
        if locator.resource != self.resource {
            return Err(StorageError::InvalidLocator {
                locator: locator.to_string(),
                reason: format!("file manager serves {}", self.resource),
            });
        }
        locator.validate()?;
        Ok(locator
            .segments()
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    /// Map a path under the mount root back to a locator
    pub fn locator_for(&self, path: &Path) -> Option<FileLocator> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(FileLocator::new(self.resource, segments.join("/")))
    }

    fn map_io(&self, err: io::Error, locator: &FileLocator) -> StorageError {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound {
                locator: locator.to_string(),
            },
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                locator: locator.to_string(),
            },
            _ => StorageError::Io(err),
        }
    }

    async fn entry_for(&self, locator: FileLocator, path: &Path) -> StorageResult<FileEntry> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| self.map_io(e, &locator))?;
        Ok(if metadata.is_dir() {
            FileEntry::folder(locator)
        } else {
            FileEntry::file(locator, metadata.len())
        })
    }

    /// Entry for a listed child
    ///
    /// A dangling link, or a child removed after the directory was read, is
    /// still listed as an empty file: reading it fails for that entry alone
    /// and page lengths stay aligned with offsets.
    async fn child_entry(&self, locator: FileLocator, path: &Path) -> StorageResult<FileEntry> {
        match self.entry_for(locator.clone(), path).await {
            Err(StorageError::NotFound { .. }) => {
                match tokio::fs::symlink_metadata(path).await {
                    Ok(_) => warn!("{} is a dangling link", locator),
                    Err(_) => warn!("{} disappeared while listing", locator),
                }
                Ok(FileEntry::file(locator, 0))
            }
            other => other,
        }
    }
}

#[async_trait]
impl FileManager for PosixFileManager {
    fn resource(&self) -> Resource {
        self.resource
    }

    async fn stat(&self, locator: &FileLocator) -> StorageResult<FileEntry> {
        let path = self.real_path(locator)?;
        self.entry_for(locator.clone(), &path).await
    }

    async fn list(
        &self,
        folder: &FileLocator,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<FileEntry>> {
        let path = self.real_path(folder)?;
        if !self.entry_for(folder.clone(), &path).await?.is_folder() {
            return Err(StorageError::NotAFolder {
                locator: folder.to_string(),
            });
        }

        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| self.map_io(e, folder))?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| self.map_io(e, folder))? {
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("Skipping {:?} in {}: name is not valid UTF-8", raw, folder),
            }
        }
        names.sort();

        let mut page = Vec::new();
        for name in names.into_iter().skip(offset).take(limit) {
            let child = folder.join(&name);
            page.push(self.child_entry(child, &path.join(&name)).await?);
        }
        debug!("Listed {} entries of {} at offset {}", page.len(), folder, offset);
        Ok(page)
    }

    async fn read(&self, file: &FileLocator) -> StorageResult<ByteStream> {
        let path = self.real_path(file)?;
        if self.entry_for(file.clone(), &path).await?.is_folder() {
            return Err(StorageError::NotAFile {
                locator: file.to_string(),
            });
        }
        let handle = tokio::fs::File::open(&path)
            .await
            .map_err(|e| self.map_io(e, file))?;

        let chunks = futures::stream::try_unfold(handle, |mut handle| async move {
            let mut buffer = vec![0u8; listing::STREAM_CHUNK_SIZE];
            let read = handle.read(&mut buffer).await?;
            if read == 0 {
                return Ok::<_, io::Error>(None);
            }
            buffer.truncate(read);
            Ok(Some((Bytes::from(buffer), handle)))
        });
        Ok(chunks.map_err(StorageError::from).boxed())
    }

    async fn write(
        &self,
        folder: &FileLocator,
        name: &str,
        mut data: ByteStream,
    ) -> StorageResult<FileLocator> {
        validate_entry_name(folder, name)?;
        let folder_path = self.real_path(folder)?;
        if !self.entry_for(folder.clone(), &folder_path).await?.is_folder() {
            return Err(StorageError::NotAFolder {
                locator: folder.to_string(),
            });
        }

        let target = folder.join(name);
        let path = folder_path.join(name);
        let mut handle = tokio::fs::File::create(&path)
            .await
            .map_err(|e| self.map_io(e, &target))?;
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            handle.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        handle.flush().await?;

        debug!("Wrote {} bytes to {}", written, target);
        Ok(target)
    }

    async fn ensure_folder(
        &self,
        parent: &FileLocator,
        name: &str,
    ) -> StorageResult<FileLocator> {
        validate_entry_name(parent, name)?;
        let target = parent.join(name);
        let path = self.real_path(&target)?;

        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(modes::FOLDER);

        match builder.create(&path).await {
            Ok(()) => {
                debug!("Created folder {}", target);
                Ok(target)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.entry_for(target.clone(), &path).await?.is_folder() {
                    Ok(target)
                } else {
                    Err(StorageError::NotAFolder {
                        locator: target.to_string(),
                    })
                }
            }
            Err(e) => Err(self.map_io(e, &target)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::files::{bytes_stream, read_all};
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> PosixFileManager {
        PosixFileManager::new(Resource::Agave, dir.path())
    }

    #[tokio::test]
    async fn test_write_then_read_and_stat() {
        let dir = TempDir::new().unwrap();
        let fm = manager(&dir);
        let root = FileLocator::root(Resource::Agave);

        let folder = fm.ensure_folder(&root, "alice").await.unwrap();
        let file = fm
            .write(&folder, "run.csv", bytes_stream(Bytes::from_static(b"a,b\n1,2\n")))
            .await
            .unwrap();

        assert_eq!(file.path, "alice/run.csv");
        let entry = fm.stat(&file).await.unwrap();
        assert!(!entry.is_folder());
        assert_eq!(entry.size, 8);
        assert_eq!(&read_all(&fm, &file).await.unwrap()[..], b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_ensure_folder_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let fm = manager(&dir);
        let root = FileLocator::root(Resource::Agave);

        let first = fm.ensure_folder(&root, "data").await.unwrap();
        let second = fm.ensure_folder(&root, "data").await.unwrap();
        assert_eq!(first, second);

        std::fs::write(dir.path().join("plain"), b"x").unwrap();
        let err = fm.ensure_folder(&root, "plain").await.unwrap_err();
        assert!(matches!(err, StorageError::NotAFolder { .. }));
    }

    #[tokio::test]
    async fn test_list_paginates_in_name_order() {
        let dir = TempDir::new().unwrap();
        for name in ["c", "a", "b", "d", "e"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let fm = manager(&dir);
        let root = FileLocator::root(Resource::Agave);

        let first = fm.list(&root, 2, 0).await.unwrap();
        let names: Vec<_> = first.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let last = fm.list(&root, 2, 4).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].name(), "e");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_link_is_listed_and_fails_alone() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"c").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("b_link")).unwrap();
        let fm = manager(&dir);

        let page = fm.list(&FileLocator::root(Resource::Agave), 10, 0).await.unwrap();
        let names: Vec<_> = page.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["a.txt", "b_link", "c.txt"]);
        assert!(!page[1].is_folder());

        let err = fm
            .read(&FileLocator::new(Resource::Agave, "b_link"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("file.txt"), b"x").unwrap();
        let fm = manager(&dir);

        let missing = fm
            .stat(&FileLocator::new(Resource::Agave, "nope"))
            .await
            .unwrap_err();
        assert!(matches!(missing, StorageError::NotFound { .. }));

        let not_folder = fm
            .list(&FileLocator::new(Resource::Agave, "file.txt"), 10, 0)
            .await
            .unwrap_err();
        assert!(matches!(not_folder, StorageError::NotAFolder { .. }));

        let wrong_backend = fm
            .stat(&FileLocator::new(Resource::Box, "file.txt"))
            .await
            .unwrap_err();
        assert!(matches!(wrong_backend, StorageError::InvalidLocator { .. }));
    }

    #[test]
    fn test_locator_for_real_path() {
        let fm = PosixFileManager::new(Resource::Public, "/mnt/public");
        let locator = fm
            .locator_for(Path::new("/mnt/public/NEES-1/data.bin"))
            .unwrap();
        assert_eq!(locator, FileLocator::new(Resource::Public, "NEES-1/data.bin"));
        assert!(fm.locator_for(Path::new("/elsewhere/x")).is_none());
    }
}
