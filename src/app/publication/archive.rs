//! Archive copy of published files
//!
//! Copies the files of a publication from the project storage root into
//! `<published-root>/<project-id>` and makes the result read-only. A re-run
//! first unlocks an existing archive so stale files can be overwritten, then
//! re-applies permissions from scratch.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::models::has_relative_segments;
use crate::constants::{listing, modes};
use crate::errors::{PublicationError, PublicationResult};

/// Called after each archived path with `(done, total)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Result of one archive run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub project_dir: PathBuf,
    /// Top-level paths requested, after dedupe
    pub paths: Vec<String>,
    pub files_copied: usize,
    /// Paths that failed with an I/O error, with the error text
    pub skipped: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct PublicationArchiver {
    published_root: PathBuf,
    projects_root: PathBuf,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for PublicationArchiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicationArchiver")
            .field("published_root", &self.published_root)
            .field("projects_root", &self.projects_root)
            .finish()
    }
}

impl PublicationArchiver {
    pub fn new(published_root: impl Into<PathBuf>, projects_root: impl Into<PathBuf>) -> Self {
        Self {
            published_root: published_root.into(),
            projects_root: projects_root.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn published_root(&self) -> &Path {
        &self.published_root
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.published_root.join(project_id)
    }

    /// Deduped, sorted paths to archive
    ///
    /// Falls back to the top-level entries of the project storage root when
    /// the publication references no files.
    pub async fn resolve_paths(
        &self,
        project_uuid: &str,
        related: Vec<String>,
    ) -> PublicationResult<Vec<String>> {
        let related: Vec<String> = related
            .into_iter()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let paths = if related.is_empty() {
            self.list_project_root(project_uuid).await?
        } else {
            related
        };

        Ok(paths
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    async fn list_project_root(&self, project_uuid: &str) -> PublicationResult<Vec<String>> {
        let root = self.projects_root.join(project_uuid);
        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|_| PublicationError::ProjectRootMissing { path: root.clone() })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| PublicationError::Archive {
                path: root.clone(),
                source,
            })?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !listing::EXCLUDED_PROJECT_ENTRIES.contains(&name.as_str()) {
                names.push(name);
            }
        }
        debug!("Fallback listing of {} found {} entries", root.display(), names.len());
        Ok(names)
    }

    /// Copy `paths` from the project root into the archive and lock it
    ///
    /// The published root is returned to read-only whether or not the run
    /// succeeds.
    pub async fn archive(
        &self,
        project_id: &str,
        project_uuid: &str,
        paths: Vec<String>,
    ) -> PublicationResult<ArchiveReport> {
        set_mode(&self.published_root, modes::WRITABLE_ROOT)
            .await
            .map_err(|source| archive_error(&self.published_root, source))?;

        let result = self.archive_unlocked(project_id, project_uuid, paths).await;
        let relock = set_mode(&self.published_root, modes::READ_ONLY_DIR).await;

        let report = result?;
        relock.map_err(|source| archive_error(&self.published_root, source))?;
        info!(
            "Archived {}: {} file(s), {} path(s) skipped",
            project_id,
            report.files_copied,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn archive_unlocked(
        &self,
        project_id: &str,
        project_uuid: &str,
        paths: Vec<String>,
    ) -> PublicationResult<ArchiveReport> {
        let project_dir = self.project_dir(project_id);
        let source_root = self.projects_root.join(project_uuid);

        if tokio::fs::metadata(&project_dir).await.is_ok() {
            apply_tree_modes(&project_dir, modes::FOLDER, modes::WRITABLE_FILE)
                .await
                .map_err(|source| archive_error(&project_dir, source))?;
        }
        tokio::fs::create_dir_all(&project_dir)
            .await
            .map_err(|source| archive_error(&project_dir, source))?;

        info!(
            "Archiving {} path(s) of {} into {}",
            paths.len(),
            project_id,
            project_dir.display()
        );

        let mut report = ArchiveReport {
            project_dir: project_dir.clone(),
            ..Default::default()
        };
        let total = paths.len();
        for (done, path) in paths.iter().enumerate() {
            match contained_path(path) {
                Some(relative) => {
                    let src = source_root.join(&relative);
                    let dst = project_dir.join(&relative);
                    if let Err(e) = copy_path(&src, &dst, path, &mut report).await {
                        warn!("Skipping {} while archiving {}: {}", path, project_id, e);
                        report.skipped.push((path.clone(), e.to_string()));
                    }
                }
                None => {
                    warn!("Refusing to archive {} for {}: path leaves the project", path, project_id);
                    report
                        .skipped
                        .push((path.clone(), "path leaves the project directory".to_string()));
                }
            }
            if let Some(progress) = &self.progress {
                progress(done + 1, total);
            }
        }
        report.paths = paths;

        apply_tree_modes(&project_dir, modes::READ_ONLY_DIR, modes::READ_ONLY_FILE)
            .await
            .map_err(|source| archive_error(&project_dir, source))?;
        Ok(report)
    }
}

pub(super) fn archive_error(path: &Path, source: std::io::Error) -> PublicationError {
    PublicationError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

/// `path` as a relative path below a project directory
///
/// `None` for paths that are empty or carry `.`/`..` segments.
fn contained_path(path: &str) -> Option<PathBuf> {
    if has_relative_segments(path) {
        return None;
    }
    let relative: PathBuf = path.split('/').filter(|s| !s.is_empty()).collect();
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Copy a file or merge a directory tree into `dst`
///
/// Failing to reach `src` itself is returned; failures below a copied
/// directory are recorded per entry in `report` and the walk continues.
async fn copy_path(
    src: &Path,
    dst: &Path,
    label: &str,
    report: &mut ArchiveReport,
) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let metadata = tokio::fs::metadata(src).await?;
    if !metadata.is_dir() {
        tokio::fs::copy(src, dst).await?;
        report.files_copied += 1;
        debug!("Archived {}", label);
        return Ok(());
    }

    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf(), label.to_string())];
    while let Some((from, to, name)) = stack.pop() {
        if let Err(e) = copy_directory_level(&from, &to, &name, &mut stack, report).await {
            warn!("Skipping rest of {} while archiving: {}", name, e);
            report.skipped.push((name, e.to_string()));
        }
    }
    Ok(())
}

/// Copy the files of one directory and queue its subdirectories
async fn copy_directory_level(
    from: &Path,
    to: &Path,
    name: &str,
    stack: &mut Vec<(PathBuf, PathBuf, String)>,
    report: &mut ArchiveReport,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(to).await?;
    let mut entries = tokio::fs::read_dir(from).await?;
    while let Some(entry) = entries.next_entry().await? {
        let child = format!("{}/{}", name, entry.file_name().to_string_lossy());
        let target = to.join(entry.file_name());
        let copied = match entry.file_type().await {
            Ok(file_type) if file_type.is_dir() => {
                stack.push((entry.path(), target, child));
                continue;
            }
            Ok(_) => tokio::fs::copy(entry.path(), &target).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match copied {
            Ok(()) => report.files_copied += 1,
            Err(e) => {
                warn!("Skipping {} while archiving: {}", child, e);
                report.skipped.push((child, e.to_string()));
            }
        }
    }
    Ok(())
}

/// Apply `dir_mode` to every directory and `file_mode` to every file under `root`
async fn apply_tree_modes(root: &Path, dir_mode: u32, file_mode: u32) -> std::io::Result<()> {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        set_mode(&dir, dir_mode).await?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                set_mode(&entry.path(), file_mode).await?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
pub(super) async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
pub(super) async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    tokio::fs::set_permissions(path, permissions).await
}
