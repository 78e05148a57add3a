//! Publication pipeline
//!
//! Publishing a project runs these stages in order, each one an independently
//! retryable task:
//!
//! 1. freeze the metadata of the published entities
//! 2. draft an identifier and freeze (`save_publication`)
//! 3. copy the files into the read-only archive
//! 4. mirror the archive into the preservation repository
//! 5. point file tags at the archived copies
//! 6. flip the publish status, registering identifiers in production
//!
//! Stages 3 and 4 touch shared storage and only act in production; elsewhere
//! they return [`StageOutcome::Skipped`] and the chain continues. Completed
//! stages are recorded in [`ProjectPublicationState`], which only moves
//! forward, so [`PublicationPipeline::run`] resumes where a previous run
//! stopped. Two concurrent runs for the same project are not serialized here.

pub mod archive;
pub mod bundle;
pub mod fedora;
pub mod manager;
pub mod mime;
pub mod preservation;
pub mod state;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::index::{IndexDepth, SubtreeIndexer};
use crate::app::models::{Environment, FileLocator, Resource};
use crate::constants::preservation as preservation_defaults;
use crate::errors::Result;

pub use archive::{ArchiveReport, ProgressCallback, PublicationArchiver};
pub use bundle::{BundleReport, PublicationBundler};
pub use fedora::FedoraClient;
pub use manager::{MemoryPublicationManager, PublicationManager};
pub use preservation::{
    MemoryPreservationRepository, MirrorReport, PreservationConfig, PreservationMirror,
    PreservationRepository, StoredResource,
};
pub use state::{ProjectPublicationState, PublicationStage};

/// Settings threaded into the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub environment: Environment,
    /// Root of the read-only archive
    pub published_root: PathBuf,
    /// Root holding one directory per project uuid
    pub projects_root: PathBuf,
    /// Preservation repository container holding all publications
    pub namespace: String,
}

impl PipelineConfig {
    pub fn new(
        environment: Environment,
        published_root: impl Into<PathBuf>,
        projects_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            environment,
            published_root: published_root.into(),
            projects_root: projects_root.into(),
            namespace: preservation_defaults::DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Result of running one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// Nothing was done; counts as completed for chaining
    Skipped { reason: String },
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Completed => f.write_str("completed"),
            StageOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
        }
    }
}

pub struct PublicationPipeline {
    config: PipelineConfig,
    manager: Arc<dyn PublicationManager>,
    repository: Arc<dyn PreservationRepository>,
    indexer: Arc<dyn SubtreeIndexer>,
    archiver: PublicationArchiver,
    bundler: PublicationBundler,
}

impl fmt::Debug for PublicationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicationPipeline")
            .field("config", &self.config)
            .field("archiver", &self.archiver)
            .field("bundler", &self.bundler)
            .finish()
    }
}

impl PublicationPipeline {
    pub fn new(
        config: PipelineConfig,
        manager: Arc<dyn PublicationManager>,
        repository: Arc<dyn PreservationRepository>,
        indexer: Arc<dyn SubtreeIndexer>,
    ) -> Self {
        let archiver = PublicationArchiver::new(&config.published_root, &config.projects_root);
        let bundler = PublicationBundler::new(&config.published_root);
        Self {
            config,
            manager,
            repository,
            indexer,
            archiver,
            bundler,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<dyn PublicationManager> {
        &self.manager
    }

    /// Locator of a project's archive on the published storage
    pub fn archived_locator(project_id: &str) -> FileLocator {
        FileLocator::new(Resource::Public, project_id)
    }

    /// Stage 1
    pub async fn freeze_metadata(&self, project_id: &str, entity_uuids: &[String]) -> Result<StageOutcome> {
        self.manager.freeze_metadata(project_id, entity_uuids).await?;
        self.record_stage(project_id, PublicationStage::MetadataFrozen, |state| {
            state.entity_uuids = entity_uuids.to_vec();
        })
        .await?;
        Ok(StageOutcome::Completed)
    }

    /// Stage 2: draft identifier, then freeze
    pub async fn save_publication(&self, project_id: &str, entity_uuids: &[String]) -> Result<StageOutcome> {
        let doi = self.manager.draft_identifier(project_id, entity_uuids).await?;
        self.manager.freeze_metadata(project_id, entity_uuids).await?;
        self.record_stage(project_id, PublicationStage::MetadataFrozen, |state| {
            state.entity_uuids = entity_uuids.to_vec();
            state.doi = Some(doi);
        })
        .await?;
        Ok(StageOutcome::Completed)
    }

    /// Stage 3: archive copy, production only
    pub async fn copy_files_to_archive(&self, project_id: &str) -> Result<StageOutcome> {
        if let Some(skipped) = self.production_only("archive copy") {
            self.record_stage(project_id, PublicationStage::FilesArchived, |_| {})
                .await?;
            return Ok(skipped);
        }

        let project_uuid = self.manager.project_uuid(project_id).await?;
        let related = self.manager.related_file_paths(project_id).await?;
        let paths = self.archiver.resolve_paths(&project_uuid, related).await?;
        let report = self.archiver.archive(project_id, &project_uuid, paths).await?;
        info!(
            project_id,
            "Archive copy finished: {} file(s), {} skipped",
            report.files_copied,
            report.skipped.len()
        );

        self.request_reindex(project_id).await;
        self.record_stage(project_id, PublicationStage::FilesArchived, |_| {})
            .await?;
        Ok(StageOutcome::Completed)
    }

    /// Stage 4: mirror into the preservation repository, production only
    pub async fn save_to_preservation(&self, project_id: &str) -> Result<StageOutcome> {
        if let Some(skipped) = self.production_only("preservation mirror") {
            self.record_stage(project_id, PublicationStage::Preserved, |_| {})
                .await?;
            return Ok(skipped);
        }

        self.manager.set_status(project_id, "published").await?;
        let archived_root = self.archiver.project_dir(project_id);
        let report = PreservationMirror::new(self.repository.as_ref(), &self.config.namespace)
            .mirror(project_id, &archived_root)
            .await?;
        info!(
            project_id,
            "Preservation mirror finished: {} container(s), {} binaries",
            report.containers,
            report.binaries
        );

        self.record_stage(project_id, PublicationStage::Preserved, |_| {})
            .await?;
        Ok(StageOutcome::Completed)
    }

    /// Stage 5
    pub async fn swap_file_tags(&self, project_id: &str) -> Result<StageOutcome> {
        let fixed = self.manager.fix_file_tags(project_id).await?;
        info!(project_id, "Rewrote {} file tag(s)", fixed);
        self.record_stage(project_id, PublicationStage::FileTagsSwapped, |_| {})
            .await?;
        Ok(StageOutcome::Completed)
    }

    /// Stage 6: reindex the archive and publish
    pub async fn set_publish_status(&self, project_id: &str, entity_uuids: &[String]) -> Result<StageOutcome> {
        let publish_dois = self.config.environment.is_production();
        self.request_reindex(project_id).await;
        self.manager
            .publish_resource(project_id, entity_uuids, publish_dois)
            .await?;
        info!(project_id, publish_dois, "Publication published");
        self.record_stage(project_id, PublicationStage::Published, |_| {})
            .await?;
        Ok(StageOutcome::Completed)
    }

    /// Zip the archived files into a downloadable bundle, production only
    ///
    /// Runs on request after the archive copy and is not part of the stage
    /// chain.
    pub async fn zip_publication_files(&self, project_id: &str) -> Result<StageOutcome> {
        if let Some(skipped) = self.production_only("archive bundle") {
            return Ok(skipped);
        }

        let report = self.bundler.bundle(project_id).await?;
        info!(
            project_id,
            "Bundle {} holds {} file(s)",
            report.path.display(),
            report.files
        );
        Ok(StageOutcome::Completed)
    }

    /// Run every stage not yet completed, in order
    ///
    /// Returns the final stage reached. A failing stage stops the run with
    /// its error; calling `run` again resumes from that stage.
    pub async fn run(&self, project_id: &str, entity_uuids: &[String]) -> Result<PublicationStage> {
        loop {
            let state = self.manager.state(project_id).await?;
            let entities = if entity_uuids.is_empty() {
                state.entity_uuids.clone()
            } else {
                entity_uuids.to_vec()
            };

            let Some(stage) = state.stage.next() else {
                return Ok(state.stage);
            };
            info!(project_id, "Running publication stage {}", stage);

            let outcome = match stage {
                PublicationStage::Draft | PublicationStage::MetadataFrozen => {
                    self.save_publication(project_id, &entities).await?
                }
                PublicationStage::FilesArchived => self.copy_files_to_archive(project_id).await?,
                PublicationStage::Preserved => self.save_to_preservation(project_id).await?,
                PublicationStage::FileTagsSwapped => self.swap_file_tags(project_id).await?,
                PublicationStage::Published => self.set_publish_status(project_id, &entities).await?,
            };
            info!(project_id, "Stage {} {}", stage, outcome);
        }
    }

    fn production_only(&self, stage: &str) -> Option<StageOutcome> {
        if self.config.environment.is_production() {
            return None;
        }
        info!(
            "Skipping {} in the {} environment",
            stage, self.config.environment
        );
        Some(StageOutcome::Skipped {
            reason: format!("{} environment", self.config.environment),
        })
    }

    async fn request_reindex(&self, project_id: &str) {
        let locator = Self::archived_locator(project_id);
        if let Err(e) = self.indexer.index_subtree(&locator, IndexDepth::Full).await {
            warn!(project_id, "Reindex request for {} failed: {}", locator, e);
        }
    }

    async fn record_stage(
        &self,
        project_id: &str,
        stage: PublicationStage,
        update: impl FnOnce(&mut ProjectPublicationState),
    ) -> Result<()> {
        let mut state = self.manager.state(project_id).await?;
        update(&mut state);
        state.advance(stage);
        self.manager.save_state(&state).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingIndexer {
        calls: Mutex<Vec<FileLocator>>,
    }

    #[async_trait]
    impl SubtreeIndexer for RecordingIndexer {
        async fn index_subtree(&self, root: &FileLocator, _depth: IndexDepth) -> Result<()> {
            self.calls.lock().unwrap().push(root.clone());
            Ok(())
        }
    }

    struct Fixture {
        _temp: TempDir,
        pipeline: PublicationPipeline,
        manager: Arc<MemoryPublicationManager>,
        repository: Arc<MemoryPreservationRepository>,
        indexer: Arc<RecordingIndexer>,
    }

    fn fixture(environment: Environment) -> Fixture {
        let temp = TempDir::new().unwrap();
        let published = temp.path().join("published");
        let projects = temp.path().join("projects");
        std::fs::create_dir_all(&published).unwrap();
        std::fs::create_dir_all(projects.join("uuid-1/b")).unwrap();
        std::fs::write(projects.join("uuid-1/a.txt"), "a").unwrap();
        std::fs::write(projects.join("uuid-1/b/c.txt"), "c").unwrap();

        let manager = Arc::new(
            MemoryPublicationManager::new().with_publication("PRJ-1", "uuid-1", &["a.txt", "b/c.txt"]),
        );
        let repository = Arc::new(MemoryPreservationRepository::new());
        let indexer = Arc::new(RecordingIndexer::default());
        let pipeline = PublicationPipeline::new(
            PipelineConfig::new(environment, published, projects),
            manager.clone(),
            repository.clone(),
            indexer.clone(),
        );
        Fixture {
            _temp: temp,
            pipeline,
            manager,
            repository,
            indexer,
        }
    }

    #[tokio::test]
    async fn test_full_run_in_production() {
        let f = fixture(Environment::Production);
        let entities = vec!["entity-1".to_string()];

        let stage = f.pipeline.run("PRJ-1", &entities).await.unwrap();
        assert_eq!(stage, PublicationStage::Published);

        let archived = f.pipeline.config().published_root.join("PRJ-1/b/c.txt");
        assert_eq!(std::fs::read_to_string(archived).unwrap(), "c");
        assert!(f
            .repository
            .paths()
            .contains(&"publications_01/PRJ-1/b/c.txt".to_string()));
        assert!(f.manager.is_registered("PRJ-1"));
        assert_eq!(f.manager.status("PRJ-1").as_deref(), Some("published"));
        assert_eq!(f.manager.frozen_entities("PRJ-1"), entities);
        // Archive completion and the publish stage each request a reindex
        assert_eq!(f.indexer.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_gated_stages_skip_outside_production() {
        let f = fixture(Environment::Staging);

        let outcome = f.pipeline.copy_files_to_archive("PRJ-1").await.unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped { .. }));
        let outcome = f.pipeline.save_to_preservation("PRJ-1").await.unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped { .. }));

        assert!(!f.pipeline.config().published_root.join("PRJ-1").exists());
        assert!(f.repository.is_empty());
        let state = f.manager.state("PRJ-1").await.unwrap();
        assert_eq!(state.stage, PublicationStage::Preserved);
    }

    #[tokio::test]
    async fn test_run_resumes_after_failure() {
        let f = fixture(Environment::Dev);
        f.pipeline.save_publication("PRJ-1", &[]).await.unwrap();
        f.pipeline.copy_files_to_archive("PRJ-1").await.unwrap();

        let stage = f.pipeline.run("PRJ-1", &[]).await.unwrap();
        assert_eq!(stage, PublicationStage::Published);
        assert_eq!(f.manager.drafts_created("PRJ-1"), 1);
        assert!(!f.manager.is_registered("PRJ-1"));
    }

    #[tokio::test]
    async fn test_zip_bundles_the_archive_in_production() {
        let f = fixture(Environment::Production);
        f.pipeline.copy_files_to_archive("PRJ-1").await.unwrap();

        let outcome = f.pipeline.zip_publication_files("PRJ-1").await.unwrap();
        assert_eq!(outcome, StageOutcome::Completed);
        let bundle = f
            .pipeline
            .config()
            .published_root
            .join("archives/PRJ-1_archive.zip");
        assert!(bundle.is_file());
        // Bundling leaves the stage record alone
        let state = f.manager.state("PRJ-1").await.unwrap();
        assert_eq!(state.stage, PublicationStage::FilesArchived);
    }

    #[tokio::test]
    async fn test_zip_skips_outside_production() {
        let f = fixture(Environment::Dev);
        let outcome = f.pipeline.zip_publication_files("PRJ-1").await.unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped { .. }));
        assert!(!f.pipeline.config().published_root.join("archives").exists());
    }

    #[tokio::test]
    async fn test_zip_without_archive_is_not_found() {
        let f = fixture(Environment::Production);
        let err = f.pipeline.zip_publication_files("PRJ-1").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_project_fails() {
        let f = fixture(Environment::Production);
        let err = f.pipeline.run("PRJ-404", &[]).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NotFound);
    }
}
