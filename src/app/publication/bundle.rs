//! Downloadable zip bundle of an archived publication
//!
//! The bundle of `PRJ-1` is written to
//! `<published-root>/archives/PRJ-1_archive.zip` with every entry under a
//! `PRJ-1/` prefix. It is built beside its final name and renamed into place,
//! so readers never see a partial bundle.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::archive::{archive_error, set_mode};
use crate::constants::{bundles, modes};
use crate::errors::{PublicationError, PublicationResult};

/// Result of one bundle run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReport {
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct PublicationBundler {
    published_root: PathBuf,
}

impl PublicationBundler {
    pub fn new(published_root: impl Into<PathBuf>) -> Self {
        Self {
            published_root: published_root.into(),
        }
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.published_root.join(bundles::DIRECTORY)
    }

    pub fn bundle_path(&self, project_id: &str) -> PathBuf {
        self.bundles_dir()
            .join(format!("{}{}", project_id, bundles::FILE_SUFFIX))
    }

    /// Zip the archived tree of `project_id`, replacing any earlier bundle
    pub async fn bundle(&self, project_id: &str) -> PublicationResult<BundleReport> {
        let project_dir = self.published_root.join(project_id);
        if !tokio::fs::metadata(&project_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(PublicationError::ArchiveMissing {
                project_id: project_id.to_string(),
            });
        }

        let bundles_dir = self.bundles_dir();
        let target = self.bundle_path(project_id);
        let partial = target.with_extension("zip.partial");

        set_mode(&self.published_root, modes::WRITABLE_ROOT)
            .await
            .map_err(|source| archive_error(&self.published_root, source))?;
        let result = self
            .write_unlocked(project_id, &project_dir, &bundles_dir, &partial, &target)
            .await;
        let relock = set_mode(&self.published_root, modes::READ_ONLY_DIR).await;

        let (files, bytes) = result?;
        relock.map_err(|source| archive_error(&self.published_root, source))?;
        info!(
            "Bundled {}: {} file(s), {} bytes into {}",
            project_id,
            files,
            bytes,
            target.display()
        );
        Ok(BundleReport {
            path: target,
            files,
            bytes,
        })
    }

    async fn write_unlocked(
        &self,
        project_id: &str,
        project_dir: &Path,
        bundles_dir: &Path,
        partial: &Path,
        target: &Path,
    ) -> PublicationResult<(usize, u64)> {
        tokio::fs::create_dir_all(bundles_dir)
            .await
            .map_err(|source| archive_error(bundles_dir, source))?;
        set_mode(bundles_dir, modes::FOLDER)
            .await
            .map_err(|source| archive_error(bundles_dir, source))?;

        let prefix = project_id.to_string();
        let source_dir = project_dir.to_path_buf();
        let output = partial.to_path_buf();
        let written = tokio::task::spawn_blocking(move || write_zip(&source_dir, &prefix, &output))
            .await
            .map_err(|e| PublicationError::Bundle {
                path: partial.to_path_buf(),
                source: zip::result::ZipError::Io(io::Error::new(io::ErrorKind::Other, e)),
            })?
            .map_err(|source| PublicationError::Bundle {
                path: partial.to_path_buf(),
                source,
            })?;

        tokio::fs::rename(partial, target)
            .await
            .map_err(|source| archive_error(target, source))?;
        set_mode(target, modes::READ_ONLY_FILE)
            .await
            .map_err(|source| archive_error(target, source))?;
        set_mode(bundles_dir, modes::READ_ONLY_DIR)
            .await
            .map_err(|source| archive_error(bundles_dir, source))?;
        Ok(written)
    }
}

/// Write `root` into a new zip at `output`; returns files and bytes stored
fn write_zip(root: &Path, prefix: &str, output: &Path) -> zip::result::ZipResult<(usize, u64)> {
    let mut zip = ZipWriter::new(File::create(output)?);
    let directory_options = FileOptions::default().unix_permissions(modes::READ_ONLY_DIR);
    let file_options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true)
        .unix_permissions(modes::READ_ONLY_FILE);

    let mut files = 0;
    let mut bytes = 0;
    let mut stack = vec![(root.to_path_buf(), prefix.to_string())];
    while let Some((dir, name)) = stack.pop() {
        zip.add_directory(format!("{name}/"), directory_options)?;

        let mut children: Vec<_> = std::fs::read_dir(&dir)?
            .collect::<io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .collect();
        children.sort();

        for child in children {
            let Some(child_name) = child.file_name().and_then(|n| n.to_str()) else {
                debug!("Leaving {} out of the bundle: name is not UTF-8", child.display());
                continue;
            };
            let entry_name = format!("{name}/{child_name}");
            if child.is_dir() {
                stack.push((child, entry_name));
                continue;
            }
            zip.start_file(entry_name.as_str(), file_options)?;
            let mut source = File::open(&child)?;
            bytes += io::copy(&mut source, &mut zip)?;
            files += 1;
        }
    }

    zip.finish()?;
    Ok((files, bytes))
}
