//! Integration tests for the queue and the dispatcher
//!
//! These run real worker pools against the in-process queue and check the
//! retry and notification contract end to end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use designsafe_tasks::app::dispatcher::{Dispatcher, DispatcherConfig};
use designsafe_tasks::app::notify::{MemoryNotifier, NotificationStatus};
use designsafe_tasks::app::queue::{TaskQueue, TaskQueueConfig, TaskStatus};
use designsafe_tasks::app::tasks::{Task, TaskRunner};
use designsafe_tasks::constants::{projects, queues};
use designsafe_tasks::errors::{Result, StorageError};
use tokio_test::assert_ok;

/// Fails transiently for the first `failures` calls, then succeeds
struct FlakyRunner {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyRunner {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TaskRunner for FlakyRunner {
    async fn run(&self, task: &Task) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(StorageError::Unavailable {
                resource: "dropbox".to_string(),
                reason: format!("attempt {} timed out", call + 1),
            }
            .into());
        }
        Ok(format!("{} done", task.operation()))
    }
}

fn test_queue() -> Arc<TaskQueue> {
    Arc::new(TaskQueue::with_config(TaskQueueConfig::for_testing()).unwrap())
}

fn upload() -> Task {
    Task::external_resource_upload(
        "alice",
        designsafe_tasks::app::models::Resource::Dropbox,
        "alice/results",
        "backups",
    )
    .unwrap()
}

#[tokio::test]
async fn test_transfer_succeeds_within_retry_budget() {
    let queue = test_queue();
    let notifier = Arc::new(MemoryNotifier::new());
    let id = assert_ok!(queue.submit(upload()).await);

    let stats = Dispatcher::new(
        DispatcherConfig::for_testing(),
        queue.clone(),
        FlakyRunner::new(3),
        notifier.clone(),
    )
    .run_until_idle()
    .await
    .unwrap();

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.total_retries, 3);

    let record = queue.get(id).await.unwrap();
    assert!(matches!(record.status, TaskStatus::Succeeded { .. }));
    match record.task {
        Task::Transfer(transfer) => assert_eq!(transfer.retry_count, 3),
        other => panic!("unexpected task {:?}", other),
    }

    assert_eq!(notifier.count(NotificationStatus::Info), 1);
    assert_eq!(notifier.count(NotificationStatus::Success), 1);
    assert_eq!(notifier.count(NotificationStatus::Error), 0);
}

#[tokio::test]
async fn test_transfer_fails_after_exhausting_retries() {
    let queue = test_queue();
    let notifier = Arc::new(MemoryNotifier::new());
    let id = assert_ok!(queue.submit(upload()).await);

    let stats = Dispatcher::new(
        DispatcherConfig::for_testing(),
        queue.clone(),
        FlakyRunner::new(4),
        notifier.clone(),
    )
    .run_until_idle()
    .await
    .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(queue.get(id).await.unwrap().attempts(), 4);

    let errors = notifier.with_status(NotificationStatus::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].user, "alice");
    assert_eq!(errors[0].operation, "external_resource_upload");
    assert_eq!(errors[0].extra["system"], "dropbox");
    assert_eq!(errors[0].extra["id"], "backups");
    assert!(errors[0].message.contains("attempt 4 timed out"));
    assert_eq!(notifier.count(NotificationStatus::Success), 0);
}

#[tokio::test]
async fn test_best_effort_task_fails_once_and_notifies_service_account() {
    let queue = test_queue();
    let notifier = Arc::new(MemoryNotifier::new());
    queue
        .submit(Task::IndexOrUpdateProject {
            project_uuid: "p-1".to_string(),
        })
        .await
        .unwrap();

    let stats = Dispatcher::new(
        DispatcherConfig::for_testing(),
        queue,
        FlakyRunner::new(1),
        notifier.clone(),
    )
    .run_until_idle()
    .await
    .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_retries, 0);
    let errors = notifier.with_status(NotificationStatus::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].user, projects::SERVICE_ACCOUNT);
    assert_eq!(errors[0].extra["project_uuid"], "p-1");
    // Service tasks announce nothing on start or success
    assert_eq!(notifier.count(NotificationStatus::Info), 0);
}

#[tokio::test]
async fn test_pool_only_drains_its_own_queues() {
    let queue = test_queue();
    let notifier = Arc::new(MemoryNotifier::new());
    for i in 0..5 {
        queue
            .submit(Task::SetProjectId {
                project_uuid: format!("p-{i}"),
            })
            .await
            .unwrap();
    }
    let transfer = queue.submit(upload()).await.unwrap();

    let mut dispatcher = Dispatcher::new(
        DispatcherConfig::for_testing().with_queues(&[queues::API]),
        queue.clone(),
        FlakyRunner::new(0),
        notifier,
    );
    dispatcher.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    dispatcher.shutdown().await.unwrap();

    let stats = queue.stats().await;
    assert_eq!(stats.succeeded, 5);
    assert_eq!(stats.pending, 1);
    assert!(matches!(
        queue.get(transfer).await.unwrap().status,
        TaskStatus::Pending
    ));
}

#[tokio::test]
async fn test_many_tasks_with_concurrent_workers() {
    let queue = test_queue();
    for i in 0..100 {
        let task = match i % 3 {
            0 => Task::IndexOrUpdateProject {
                project_uuid: format!("p-{i}"),
            },
            1 => Task::CheckProjectFilesMetaPems {
                project_uuid: format!("p-{i}"),
            },
            _ => Task::copy_public_to_mydata("bob", &format!("NEES-{i}"), "bob"),
        };
        queue.submit(task).await.unwrap();
    }

    let stats = Dispatcher::new(
        DispatcherConfig::for_testing().with_worker_count(8),
        queue.clone(),
        FlakyRunner::new(0),
        Arc::new(MemoryNotifier::new()),
    )
    .run_until_idle()
    .await
    .unwrap();

    assert_eq!(stats.total_submitted, 100);
    assert_eq!(stats.succeeded, 100);
    assert!(queue.is_finished().await);
    assert_eq!(queue.cleanup().await, 100);
}
