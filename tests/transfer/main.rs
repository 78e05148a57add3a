//! Transfers between backends, from the copier up through the worker pool

use std::sync::Arc;

use designsafe_tasks::app::copier::TreeCopier;
use designsafe_tasks::app::dispatcher::{Dispatcher, DispatcherConfig};
use designsafe_tasks::app::files::{FileManagerRegistry, MemoryFileManager, PosixFileManager};
use designsafe_tasks::app::index::{IndexDepth, MemorySearchIndex};
use designsafe_tasks::app::models::{Environment, FileLocator, Resource};
use designsafe_tasks::app::notify::{MemoryNotifier, NotificationStatus};
use designsafe_tasks::app::publication::{
    MemoryPreservationRepository, MemoryPublicationManager, PipelineConfig, PublicationPipeline,
};
use designsafe_tasks::app::queue::{TaskQueue, TaskQueueConfig};
use designsafe_tasks::app::tasks::{MemoryMetadataService, Task, TaskContext};
use designsafe_tasks::constants::queues;
use designsafe_tasks::errors::ErrorKind;
use tempfile::TempDir;

fn test_queue() -> Arc<TaskQueue> {
    Arc::new(TaskQueue::with_config(TaskQueueConfig::for_testing()).unwrap())
}

/// Private storage on disk with `alice/results/{run.csv,plots/p1.png}`
fn private_storage() -> (TempDir, Arc<PosixFileManager>) {
    let temp = TempDir::new().unwrap();
    let results = temp.path().join("alice/results");
    std::fs::create_dir_all(results.join("plots")).unwrap();
    std::fs::write(results.join("run.csv"), "t,x\n0,1\n").unwrap();
    std::fs::write(results.join("plots/p1.png"), [0x89, b'P', b'N', b'G']).unwrap();
    let fm = Arc::new(PosixFileManager::new(Resource::Agave, temp.path()));
    (temp, fm)
}

/// Drain the indexing queue and return the requested index tasks
async fn index_requests(queue: &TaskQueue) -> Vec<(FileLocator, IndexDepth)> {
    let indexing = vec![queues::INDEXING.to_string()];
    let mut requests = Vec::new();
    while let Some(record) = queue.claim_next(&indexing, 0).await {
        match record.task {
            Task::IndexFiles { locator, depth } => requests.push((locator, depth)),
            other => panic!("unexpected task on the indexing queue: {:?}", other),
        }
        queue.mark_succeeded(record.id).await.unwrap();
    }
    requests
}

#[tokio::test]
async fn test_folder_copy_between_disk_roots_is_idempotent() {
    let (_private, agave) = private_storage();
    let public_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(public_dir.path().join("NEES-1")).unwrap();

    let queue = test_queue();
    let files = Arc::new(
        FileManagerRegistry::new()
            .with(agave)
            .with(Arc::new(PosixFileManager::new(Resource::Public, public_dir.path()))),
    );
    let copier = TreeCopier::new(files, queue.clone());
    let source = FileLocator::new(Resource::Agave, "alice/results");
    let destination = FileLocator::new(Resource::Public, "NEES-1");

    let report = copier.copy(&source, &destination).await.unwrap();
    assert_eq!(report.files_copied, 2);
    assert_eq!(report.folders_created, 2);
    assert!(report.is_complete());
    assert_eq!(
        std::fs::read_to_string(public_dir.path().join("NEES-1/results/run.csv")).unwrap(),
        "t,x\n0,1\n"
    );

    let again = copier.copy(&source, &destination).await.unwrap();
    assert_eq!(again.files_copied, 2);
    assert_eq!(
        std::fs::read(public_dir.path().join("NEES-1/results/plots/p1.png")).unwrap(),
        vec![0x89, b'P', b'N', b'G']
    );

    // One full-depth request per completed copy
    let expected = (
        FileLocator::new(Resource::Public, "NEES-1/results"),
        IndexDepth::Full,
    );
    assert_eq!(index_requests(&queue).await, vec![expected.clone(), expected]);
}

#[tokio::test]
async fn test_single_file_copy_requests_one_level() {
    let (_private, agave) = private_storage();
    let dropbox = Arc::new(MemoryFileManager::new(Resource::Dropbox).with_folder("backups"));

    let queue = test_queue();
    let files = Arc::new(FileManagerRegistry::new().with(agave).with(dropbox.clone()));
    let copier = TreeCopier::new(files, queue.clone());

    let report = copier
        .copy(
            &FileLocator::new(Resource::Agave, "alice/results/run.csv"),
            &FileLocator::new(Resource::Dropbox, "backups"),
        )
        .await
        .unwrap();

    assert_eq!(report.bytes_copied, 8);
    assert_eq!(
        &dropbox.contents("backups/run.csv").unwrap()[..],
        b"t,x\n0,1\n"
    );
    assert_eq!(
        index_requests(&queue).await,
        vec![(
            FileLocator::new(Resource::Dropbox, "backups/run.csv"),
            IndexDepth::Levels(1)
        )]
    );
}

#[tokio::test]
async fn test_file_destination_is_rejected() {
    let (_private, agave) = private_storage();
    let queue = test_queue();
    let copier = TreeCopier::new(Arc::new(FileManagerRegistry::new().with(agave)), queue.clone());

    let err = copier
        .copy(
            &FileLocator::new(Resource::Agave, "alice/results/plots"),
            &FileLocator::new(Resource::Agave, "alice/results/run.csv"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(queue.is_finished().await);
}

struct Service {
    queue: Arc<TaskQueue>,
    context: Arc<TaskContext>,
    index: Arc<MemorySearchIndex>,
    dropbox: Arc<MemoryFileManager>,
    _private: TempDir,
    _published: TempDir,
}

fn service() -> Service {
    let (private, agave) = private_storage();
    let published = TempDir::new().unwrap();
    let dropbox = Arc::new(MemoryFileManager::new(Resource::Dropbox).with_folder("backups"));
    let queue = test_queue();
    let index = Arc::new(MemorySearchIndex::new());

    let files = Arc::new(FileManagerRegistry::new().with(agave).with(dropbox.clone()));
    let pipeline = Arc::new(PublicationPipeline::new(
        PipelineConfig::new(
            Environment::Dev,
            published.path(),
            private.path().join("projects"),
        ),
        Arc::new(MemoryPublicationManager::new()),
        Arc::new(MemoryPreservationRepository::new()),
        queue.clone(),
    ));
    let context = Arc::new(TaskContext::new(
        files,
        index.clone(),
        Arc::new(MemoryMetadataService::new()),
        pipeline,
        queue.clone(),
    ));

    Service {
        queue,
        context,
        index,
        dropbox,
        _private: private,
        _published: published,
    }
}

impl Service {
    async fn run(&self, notifier: Arc<MemoryNotifier>) -> designsafe_tasks::app::queue::QueueStats {
        Dispatcher::new(
            DispatcherConfig::for_testing(),
            self.queue.clone(),
            self.context.clone(),
            notifier,
        )
        .run_until_idle()
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_upload_runs_copy_and_index_through_the_pool() {
    let service = service();
    let notifier = Arc::new(MemoryNotifier::new());
    let task =
        Task::external_resource_upload("alice", Resource::Dropbox, "alice/results", "backups")
            .unwrap();
    service.queue.submit(task).await.unwrap();

    let stats = service.run(notifier.clone()).await;

    // The transfer and the index request it queued
    assert_eq!(stats.succeeded, 2);
    assert!(service.dropbox.contents("backups/results/plots/p1.png").is_some());
    assert_eq!(service.index.documents_for("dropbox:backups/results/run.csv").len(), 1);
    assert_eq!(service.index.documents_for("dropbox:backups/results").len(), 1);

    assert_eq!(notifier.count(NotificationStatus::Info), 1);
    let success = notifier.with_status(NotificationStatus::Success);
    assert_eq!(success.len(), 1);
    assert_eq!(success[0].user, "alice");
    assert!(success[0].message.contains("2 file(s)"));
}

#[tokio::test]
async fn test_unreachable_destination_is_retried() {
    let service = service();
    service.dropbox.fail_next(1);
    let notifier = Arc::new(MemoryNotifier::new());
    let task =
        Task::external_resource_upload("alice", Resource::Dropbox, "alice/results", "backups")
            .unwrap();
    service.queue.submit(task).await.unwrap();

    let stats = service.run(notifier.clone()).await;

    assert_eq!(stats.total_retries, 1);
    assert_eq!(stats.failed, 0);
    assert!(service.dropbox.contents("backups/results/run.csv").is_some());
    // Only the first attempt announces the start
    assert_eq!(notifier.count(NotificationStatus::Info), 1);
    assert_eq!(notifier.count(NotificationStatus::Success), 1);
}

#[tokio::test]
async fn test_denied_destination_fails_without_retry() {
    let service = service();
    service.dropbox.deny("backups");
    let notifier = Arc::new(MemoryNotifier::new());
    let task =
        Task::external_resource_upload("alice", Resource::Dropbox, "alice/results", "backups")
            .unwrap();
    service.queue.submit(task).await.unwrap();

    let stats = service.run(notifier.clone()).await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_retries, 0);
    let errors = notifier.with_status(NotificationStatus::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Permission denied"));
    assert!(service.index.is_empty());
}
