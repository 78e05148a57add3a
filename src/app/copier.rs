//! Tree copier
//!
//! Replicates a file or folder subtree from one backend into a destination
//! folder on another, preserving structure. Folders are walked with an
//! explicit work stack and paginated listings (page size 100 by default), so
//! deep trees never grow the call stack.
//!
//! Failure handling follows the error taxonomy:
//!
//! - an entry failing with a transient or permission error aborts the whole
//!   copy, and the first such error is returned so the task can be re-run;
//! - any other entry failure (vanished file, wrong kind, bad name) is logged,
//!   recorded in the [`CopyReport`], and its siblings continue.
//!
//! Copying is idempotent: existing folders are reused and existing files are
//! overwritten. Each completed top-level copy requests exactly one subtree
//! index of the destination: one level for a file, full depth for a folder.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::files::{FileManager, FileManagerRegistry};
use crate::app::index::{IndexDepth, SubtreeIndexer};
use crate::app::models::{FileEntry, FileLocator};
use crate::constants::listing;
use crate::errors::{AppError, Result, StorageError};

/// Summary of one top-level copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Locator of the copied root on the destination backend
    pub root: Option<FileLocator>,
    pub files_copied: usize,
    pub folders_created: usize,
    pub bytes_copied: u64,
    /// Entries skipped after a non-fatal error, with the error text
    pub skipped: Vec<(FileLocator, String)>,
    /// Depth of the index requested for the destination
    pub index_depth: Option<IndexDepth>,
}

impl CopyReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} file(s), {} folder(s), {} bytes",
            self.files_copied, self.folders_created, self.bytes_copied
        );
        if !self.skipped.is_empty() {
            summary.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        summary
    }
}

pub struct TreeCopier {
    files: Arc<FileManagerRegistry>,
    indexer: Arc<dyn SubtreeIndexer>,
    page_size: usize,
}

impl std::fmt::Debug for TreeCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCopier")
            .field("files", &self.files)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl TreeCopier {
    pub fn new(files: Arc<FileManagerRegistry>, indexer: Arc<dyn SubtreeIndexer>) -> Self {
        Self {
            files,
            indexer,
            page_size: listing::PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Copy `source` into the folder `destination`, keeping the source name
    pub async fn copy(&self, source: &FileLocator, destination: &FileLocator) -> Result<CopyReport> {
        let src_fm = self.files.get(source.resource)?;
        let dst_fm = self.files.get(destination.resource)?;

        let source_entry = src_fm.stat(source).await?;
        let destination_entry = dst_fm.stat(destination).await?;
        if !destination_entry.is_folder() {
            return Err(StorageError::NotAFolder {
                locator: destination.to_string(),
            }
            .into());
        }

        info!("Copying {} into {}", source, destination);
        let mut report = CopyReport::default();

        let (root, depth) = if source_entry.is_folder() {
            let root = self
                .copy_folder(src_fm.as_ref(), dst_fm.as_ref(), &source_entry, destination, &mut report)
                .await?;
            (root, IndexDepth::Full)
        } else {
            let root = self
                .copy_file(src_fm.as_ref(), dst_fm.as_ref(), &source_entry, destination, &mut report)
                .await?;
            (root, IndexDepth::Levels(1))
        };

        if let Err(e) = self.indexer.index_subtree(&root, depth).await {
            warn!("Index request for {} failed: {}", root, e);
        }
        report.root = Some(root);
        report.index_depth = Some(depth);

        info!("Copied {} into {}: {}", source, destination, report.summary());
        Ok(report)
    }

    async fn copy_file(
        &self,
        src_fm: &dyn FileManager,
        dst_fm: &dyn FileManager,
        entry: &FileEntry,
        destination: &FileLocator,
        report: &mut CopyReport,
    ) -> Result<FileLocator> {
        let data = src_fm.read(&entry.locator).await?;
        let target = dst_fm.write(destination, entry.name(), data).await?;
        report.files_copied += 1;
        report.bytes_copied += entry.size;
        debug!("Copied file {} to {}", entry.locator, target);
        Ok(target)
    }

    async fn copy_folder(
        &self,
        src_fm: &dyn FileManager,
        dst_fm: &dyn FileManager,
        entry: &FileEntry,
        destination: &FileLocator,
        report: &mut CopyReport,
    ) -> Result<FileLocator> {
        let root = dst_fm.ensure_folder(destination, entry.name()).await?;
        report.folders_created += 1;

        let mut stack = vec![(entry.locator.clone(), root.clone())];
        while let Some((source_folder, target_folder)) = stack.pop() {
            let mut offset = 0;
            loop {
                let page = match src_fm.list(&source_folder, self.page_size, offset).await {
                    Ok(page) => page,
                    Err(e) => {
                        self.skip_or_abort(&source_folder, e.into(), report)?;
                        break;
                    }
                };
                let page_len = page.len();
                offset += page_len;

                for child in page {
                    let outcome = if child.is_folder() {
                        dst_fm
                            .ensure_folder(&target_folder, child.name())
                            .await
                            .map(|created| {
                                report.folders_created += 1;
                                stack.push((child.locator.clone(), created));
                            })
                            .map_err(AppError::from)
                    } else {
                        self.copy_file(src_fm, dst_fm, &child, &target_folder, report)
                            .await
                            .map(|_| ())
                    };
                    if let Err(e) = outcome {
                        self.skip_or_abort(&child.locator, e, report)?;
                    }
                }

                if page_len < self.page_size {
                    break;
                }
            }
        }

        Ok(root)
    }

    /// Record a non-fatal entry error, or return the fatal one
    fn skip_or_abort(
        &self,
        locator: &FileLocator,
        error: AppError,
        report: &mut CopyReport,
    ) -> Result<()> {
        if error.kind().aborts_tree_walk() {
            warn!("Aborting copy at {}: {}", locator, error);
            return Err(error);
        }
        warn!("Skipping {}: {}", locator, error);
        report.skipped.push((locator.clone(), error.to_string()));
        Ok(())
    }
}
