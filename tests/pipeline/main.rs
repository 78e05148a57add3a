//! End-to-end publication runs through the task chain

use std::path::Path;
use std::sync::Arc;

use designsafe_tasks::app::dispatcher::{Dispatcher, DispatcherConfig};
use designsafe_tasks::app::files::{FileManagerRegistry, PosixFileManager};
use designsafe_tasks::app::index::MemorySearchIndex;
use designsafe_tasks::app::models::{Environment, Resource};
use designsafe_tasks::app::notify::{MemoryNotifier, NotificationStatus};
use designsafe_tasks::app::publication::{
    MemoryPreservationRepository, MemoryPublicationManager, PipelineConfig, PublicationArchiver,
    PublicationManager, PublicationPipeline, PublicationStage, StageOutcome,
};
use designsafe_tasks::app::queue::{TaskQueue, TaskQueueConfig};
use designsafe_tasks::app::tasks::{MemoryMetadataService, Task, TaskContext};
use tempfile::TempDir;

struct Harness {
    temp: TempDir,
    queue: Arc<TaskQueue>,
    context: Arc<TaskContext>,
    manager: Arc<MemoryPublicationManager>,
    repository: Arc<MemoryPreservationRepository>,
    index: Arc<MemorySearchIndex>,
}

impl Harness {
    fn new(environment: Environment) -> Self {
        let temp = TempDir::new().unwrap();
        let published = temp.path().join("published");
        let projects = temp.path().join("projects");
        std::fs::create_dir_all(&published).unwrap();
        std::fs::create_dir_all(projects.join("uuid-1/b")).unwrap();
        std::fs::write(projects.join("uuid-1/a.txt"), "alpha").unwrap();
        std::fs::write(projects.join("uuid-1/b/c.txt"), "gamma").unwrap();

        let queue = Arc::new(TaskQueue::with_config(TaskQueueConfig::for_testing()).unwrap());
        let files = Arc::new(
            FileManagerRegistry::new()
                .with(Arc::new(PosixFileManager::new(Resource::Public, &published)))
                .with(Arc::new(PosixFileManager::new(Resource::Agave, &projects))),
        );
        let manager = Arc::new(
            MemoryPublicationManager::new().with_publication("PRJ-1", "uuid-1", &["a.txt", "b/c.txt"]),
        );
        let repository = Arc::new(MemoryPreservationRepository::new());
        let index = Arc::new(MemorySearchIndex::new());

        let pipeline = Arc::new(PublicationPipeline::new(
            PipelineConfig::new(environment, &published, &projects),
            manager.clone(),
            repository.clone(),
            queue.clone(),
        ));
        let context = Arc::new(TaskContext::new(
            files,
            index.clone(),
            Arc::new(MemoryMetadataService::new()),
            pipeline,
            queue.clone(),
        ));

        Self {
            temp,
            queue,
            context,
            manager,
            repository,
            index,
        }
    }

    fn published(&self) -> std::path::PathBuf {
        self.temp.path().join("published")
    }

    /// One worker keeps the two index requests for the archive sequential
    fn dispatcher(&self, notifier: Arc<MemoryNotifier>) -> Dispatcher {
        Dispatcher::new(
            DispatcherConfig::for_testing().with_worker_count(1),
            self.queue.clone(),
            self.context.clone(),
            notifier,
        )
    }
}

fn save_publication() -> Task {
    Task::SavePublication {
        project_id: "PRJ-1".to_string(),
        entity_uuids: vec!["entity-1".to_string()],
    }
}

#[cfg(unix)]
fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[tokio::test]
async fn test_production_chain_publishes_and_indexes_archive() {
    let harness = Harness::new(Environment::Production);
    let notifier = Arc::new(MemoryNotifier::new());
    harness.queue.submit(save_publication()).await.unwrap();

    let stats = harness
        .dispatcher(notifier.clone())
        .run_until_idle()
        .await
        .unwrap();

    // Five chained stages plus the two archive index requests
    assert_eq!(stats.succeeded, 7);
    assert_eq!(stats.failed, 0);

    let state = harness.manager.state("PRJ-1").await.unwrap();
    assert_eq!(state.stage, PublicationStage::Published);
    assert_eq!(state.entity_uuids, vec!["entity-1".to_string()]);
    assert_eq!(harness.manager.status("PRJ-1").as_deref(), Some("published"));
    assert!(harness.manager.is_registered("PRJ-1"));
    assert_eq!(harness.manager.file_tags_fixed("PRJ-1"), 2);

    let archived = harness.published().join("PRJ-1/b/c.txt");
    assert_eq!(std::fs::read_to_string(&archived).unwrap(), "gamma");
    assert!(harness
        .repository
        .paths()
        .contains(&"publications_01/PRJ-1/b/c.txt".to_string()));

    assert_eq!(harness.index.documents_for("public:PRJ-1/b/c.txt").len(), 1);
    assert_eq!(harness.index.documents_for("public:PRJ-1").len(), 1);

    // Publication tasks only report terminal failures
    assert!(notifier.all().is_empty());
}

#[tokio::test]
async fn test_transient_manager_failure_is_retried() {
    let harness = Harness::new(Environment::Production);
    harness.manager.fail_next(1);
    harness.queue.submit(save_publication()).await.unwrap();

    let stats = harness
        .dispatcher(Arc::new(MemoryNotifier::new()))
        .run_until_idle()
        .await
        .unwrap();

    assert_eq!(stats.total_retries, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(harness.manager.drafts_created("PRJ-1"), 1);
    assert_eq!(harness.manager.status("PRJ-1").as_deref(), Some("published"));
}

#[tokio::test]
async fn test_unknown_project_fails_without_retry() {
    let harness = Harness::new(Environment::Production);
    let notifier = Arc::new(MemoryNotifier::new());
    harness
        .queue
        .submit(Task::SavePublication {
            project_id: "PRJ-404".to_string(),
            entity_uuids: vec![],
        })
        .await
        .unwrap();

    let stats = harness
        .dispatcher(notifier.clone())
        .run_until_idle()
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_retries, 0);
    let errors = notifier.with_status(NotificationStatus::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].extra["project_id"], "PRJ-404");
}

#[tokio::test]
async fn test_staging_pipeline_skips_shared_storage() {
    let harness = Harness::new(Environment::Staging);
    let pipeline = PublicationPipeline::new(
        PipelineConfig::new(
            Environment::Staging,
            harness.published(),
            harness.temp.path().join("projects"),
        ),
        harness.manager.clone(),
        harness.repository.clone(),
        harness.queue.clone(),
    );

    let stage = pipeline.run("PRJ-1", &["entity-1".to_string()]).await.unwrap();
    assert_eq!(stage, PublicationStage::Published);
    assert!(!harness.published().join("PRJ-1").exists());
    assert!(harness.repository.is_empty());
    assert!(!harness.manager.is_registered("PRJ-1"));
    // Only the publish stage asks for a reindex
    assert_eq!(harness.queue.stats().await.pending, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_archive_rerun_replaces_locked_files() {
    let harness = Harness::new(Environment::Production);
    let published = harness.published();
    let archiver = PublicationArchiver::new(&published, harness.temp.path().join("projects"));

    let paths = vec!["a.txt".to_string(), "b".to_string()];
    archiver.archive("PRJ-1", "uuid-1", paths.clone()).await.unwrap();
    assert_eq!(mode_of(&published.join("PRJ-1/a.txt")), 0o444);

    std::fs::write(harness.temp.path().join("projects/uuid-1/a.txt"), "alpha v2").unwrap();
    let report = archiver.archive("PRJ-1", "uuid-1", paths).await.unwrap();

    assert_eq!(report.files_copied, 2);
    assert!(report.skipped.is_empty());
    assert_eq!(
        std::fs::read_to_string(published.join("PRJ-1/a.txt")).unwrap(),
        "alpha v2"
    );
    assert_eq!(mode_of(&published.join("PRJ-1/a.txt")), 0o444);
    assert_eq!(mode_of(&published.join("PRJ-1/b/c.txt")), 0o444);
    assert_eq!(mode_of(&published.join("PRJ-1/b")), 0o555);
    assert_eq!(mode_of(&published.join("PRJ-1")), 0o555);
    assert_eq!(mode_of(&published), 0o555);
}

#[cfg(unix)]
#[tokio::test]
async fn test_archive_stage_overwrites_stale_locked_copy() {
    use std::os::unix::fs::PermissionsExt;

    let harness = Harness::new(Environment::Production);
    let published = harness.published();
    let set_mode = |path: &Path, mode: u32| {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    };

    // A previous run left a stale, locked a.txt and no b/c.txt
    std::fs::create_dir_all(published.join("PRJ-1")).unwrap();
    std::fs::write(published.join("PRJ-1/a.txt"), "stale").unwrap();
    set_mode(&published.join("PRJ-1/a.txt"), 0o444);
    set_mode(&published.join("PRJ-1"), 0o555);
    set_mode(&published, 0o555);

    let pipeline = PublicationPipeline::new(
        PipelineConfig::new(
            Environment::Production,
            &published,
            harness.temp.path().join("projects"),
        ),
        harness.manager.clone(),
        harness.repository.clone(),
        harness.queue.clone(),
    );
    let outcome = pipeline.copy_files_to_archive("PRJ-1").await.unwrap();
    assert_eq!(outcome, StageOutcome::Completed);

    assert_eq!(
        std::fs::read_to_string(published.join("PRJ-1/a.txt")).unwrap(),
        "alpha"
    );
    assert_eq!(
        std::fs::read_to_string(published.join("PRJ-1/b/c.txt")).unwrap(),
        "gamma"
    );
    assert_eq!(mode_of(&published.join("PRJ-1/a.txt")), 0o444);
    assert_eq!(mode_of(&published.join("PRJ-1/b/c.txt")), 0o444);
    assert_eq!(mode_of(&published.join("PRJ-1/b")), 0o555);
    assert_eq!(mode_of(&published.join("PRJ-1")), 0o555);
    assert_eq!(mode_of(&published), 0o555);

    let state = harness.manager.state("PRJ-1").await.unwrap();
    assert_eq!(state.stage, PublicationStage::FilesArchived);
    // The archive copy asks for one reindex of public:PRJ-1
    assert_eq!(harness.queue.stats().await.pending, 1);
}
