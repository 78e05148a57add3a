//! Task catalogue and execution
//!
//! Every unit of background work is a [`Task`] variant with named fields.
//! Tasks declare their queue and retry policy; the dispatcher uses both, and
//! a [`TaskRunner`] executes the body. [`TaskContext`] is the production
//! runner: it holds the collaborators every task needs and queues the next
//! publication stage when one completes.

pub mod projects;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::app::copier::TreeCopier;
use crate::app::files::FileManagerRegistry;
use crate::app::index::{IndexDepth, IndexerSync, SearchIndex};
use crate::app::models::{FileLocator, Resource, TransferTask};
use crate::app::publication::PublicationPipeline;
use crate::app::queue::{RetryPolicy, TaskQueue};
use crate::constants::{notifications, projects as project_constants, queues, retry};
use crate::errors::{Result, StorageError, StorageResult};

pub use projects::{AclJob, MemoryMetadataService, MetadataService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Copy between backends on behalf of a user
    Transfer(TransferTask),
    IndexOrUpdateProject {
        project_uuid: String,
    },
    ReindexProjects,
    SetProjectId {
        project_uuid: String,
    },
    /// Index a file subtree
    IndexFiles {
        locator: FileLocator,
        depth: IndexDepth,
    },
    CheckProjectFilesMetaPems {
        project_uuid: String,
    },
    /// Re-apply project permissions to one file-metadata record
    CheckProjectMetaPems {
        metadata_uuid: String,
    },
    SetFaclProject {
        project_uuid: String,
        usernames: Vec<String>,
    },
    FreezePublicationMeta {
        project_id: String,
        entity_uuids: Vec<String>,
    },
    /// Starts the publication chain
    SavePublication {
        project_id: String,
        entity_uuids: Vec<String>,
    },
    CopyPublicationFilesToArchive {
        project_id: String,
    },
    SaveToPreservation {
        project_id: String,
    },
    SwapFileTagUuids {
        project_id: String,
    },
    SetPublishStatus {
        project_id: String,
        entity_uuids: Vec<String>,
    },
    /// Build the downloadable bundle of an archived publication
    ZipPublicationFiles {
        project_id: String,
    },
}

impl Task {
    /// Copy a public file or folder into a user's private storage
    pub fn copy_public_to_mydata(username: &str, source_path: &str, destination_path: &str) -> Self {
        Task::Transfer(TransferTask::new(
            username,
            FileLocator::new(Resource::Public, source_path),
            FileLocator::new(Resource::Agave, destination_path),
        ))
    }

    /// Push from private storage into a folder on an external backend
    pub fn external_resource_upload(
        username: &str,
        destination: Resource,
        source_path: &str,
        destination_path: &str,
    ) -> StorageResult<Self> {
        require_external(destination)?;
        Ok(Task::Transfer(TransferTask::new(
            username,
            FileLocator::new(Resource::Agave, source_path),
            FileLocator::new(destination, destination_path),
        )))
    }

    /// Pull from an external backend into a private-storage folder
    pub fn external_resource_download(
        username: &str,
        source: Resource,
        source_path: &str,
        destination_path: &str,
    ) -> StorageResult<Self> {
        require_external(source)?;
        Ok(Task::Transfer(TransferTask::new(
            username,
            FileLocator::new(source, source_path),
            FileLocator::new(Resource::Agave, destination_path),
        )))
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Task::Transfer(transfer) => transfer.operation(),
            Task::IndexOrUpdateProject { .. } => "index_or_update_project",
            Task::ReindexProjects => "reindex_projects",
            Task::SetProjectId { .. } => "set_project_id",
            Task::IndexFiles { .. } => "index_files",
            Task::CheckProjectFilesMetaPems { .. } => "check_project_files_meta_pems",
            Task::CheckProjectMetaPems { .. } => "check_project_meta_pems",
            Task::SetFaclProject { .. } => "set_facl_project",
            Task::FreezePublicationMeta { .. } => "freeze_publication_meta",
            Task::SavePublication { .. } => "save_publication",
            Task::CopyPublicationFilesToArchive { .. } => "copy_publication_files_to_corral",
            Task::SaveToPreservation { .. } => "save_to_fedora",
            Task::SwapFileTagUuids { .. } => "swap_file_tag_uuids",
            Task::SetPublishStatus { .. } => "set_publish_status",
            Task::ZipPublicationFiles { .. } => "zip_publication_files",
        }
    }

    /// Queue the task is routed to
    pub fn queue(&self) -> &'static str {
        match self {
            Task::IndexOrUpdateProject { .. } | Task::ReindexProjects | Task::SetProjectId { .. } => {
                queues::API
            }
            Task::IndexFiles { .. } => queues::INDEXING,
            _ => queues::DEFAULT,
        }
    }

    /// Retry policy, or `None` for best-effort tasks
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        match self {
            Task::Transfer(transfer) => Some(RetryPolicy::exponential(
                transfer.max_retries,
                retry::DEFAULT_DELAY,
            )),
            Task::FreezePublicationMeta { .. } | Task::SavePublication { .. } => Some(
                RetryPolicy::fixed(retry::FREEZE_MAX_RETRIES, retry::FREEZE_DELAY),
            ),
            Task::CopyPublicationFilesToArchive { .. } => Some(RetryPolicy::fixed(
                retry::ARCHIVE_MAX_RETRIES,
                retry::DEFAULT_DELAY,
            )),
            Task::SaveToPreservation { .. } | Task::SetFaclProject { .. } => Some(
                RetryPolicy::fixed(retry::PRESERVATION_MAX_RETRIES, retry::PRESERVATION_DELAY),
            ),
            Task::SwapFileTagUuids { .. } => Some(RetryPolicy::fixed(
                retry::FILE_TAG_MAX_RETRIES,
                retry::DEFAULT_DELAY,
            )),
            Task::ZipPublicationFiles { .. } => Some(RetryPolicy::fixed(
                retry::BUNDLE_MAX_RETRIES,
                retry::DEFAULT_DELAY,
            )),
            Task::IndexOrUpdateProject { .. }
            | Task::ReindexProjects
            | Task::SetProjectId { .. }
            | Task::IndexFiles { .. }
            | Task::CheckProjectFilesMetaPems { .. }
            | Task::CheckProjectMetaPems { .. }
            | Task::SetPublishStatus { .. } => None,
        }
    }

    /// Called by the queue when a retry is scheduled
    pub fn record_retry(&mut self) {
        if let Task::Transfer(transfer) = self {
            transfer.retry_count += 1;
        }
    }

    /// User-triggered tasks report start and success, not just failure
    pub fn notifies_progress(&self) -> bool {
        matches!(self, Task::Transfer(_))
    }

    /// User to notify; service tasks notify the service account
    pub fn username(&self) -> &str {
        match self {
            Task::Transfer(transfer) => &transfer.username,
            _ => project_constants::SERVICE_ACCOUNT,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Task::Transfer(_) | Task::IndexFiles { .. } => notifications::DATA_EVENT,
            Task::FreezePublicationMeta { .. }
            | Task::SavePublication { .. }
            | Task::CopyPublicationFilesToArchive { .. }
            | Task::SaveToPreservation { .. }
            | Task::SwapFileTagUuids { .. }
            | Task::SetPublishStatus { .. }
            | Task::ZipPublicationFiles { .. } => notifications::PUBLICATION_EVENT,
            _ => notifications::PROJECT_EVENT,
        }
    }

    /// Context attached to notifications about this task
    pub fn notification_extra(&self) -> Map<String, Value> {
        let extra = match self {
            Task::Transfer(t) => json!({
                "system": t.destination.resource.as_str(),
                "id": t.destination.path,
                "src_file_id": t.source.path,
                "src_resource": t.source.resource.as_str(),
            }),
            Task::IndexFiles { locator, .. } => json!({
                "system": locator.resource.as_str(),
                "id": locator.path,
            }),
            Task::FreezePublicationMeta { project_id, .. }
            | Task::SavePublication { project_id, .. }
            | Task::CopyPublicationFilesToArchive { project_id }
            | Task::SaveToPreservation { project_id }
            | Task::SwapFileTagUuids { project_id }
            | Task::SetPublishStatus { project_id, .. }
            | Task::ZipPublicationFiles { project_id } => json!({ "project_id": project_id }),
            Task::IndexOrUpdateProject { project_uuid }
            | Task::SetProjectId { project_uuid }
            | Task::CheckProjectFilesMetaPems { project_uuid }
            | Task::SetFaclProject { project_uuid, .. } => json!({ "project_uuid": project_uuid }),
            Task::CheckProjectMetaPems { metadata_uuid } => json!({ "metadata_uuid": metadata_uuid }),
            Task::ReindexProjects => json!({}),
        };
        match extra {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Transfer(t) => write!(f, "{} {} to {}", t.operation(), t.source, t.destination),
            Task::IndexFiles { locator, depth } => write!(f, "index_files {} ({})", locator, depth),
            other => {
                let extra = other.notification_extra();
                match extra.values().next().and_then(Value::as_str) {
                    Some(subject) => write!(f, "{} {}", other.operation(), subject),
                    None => f.write_str(other.operation()),
                }
            }
        }
    }
}

fn require_external(resource: Resource) -> StorageResult<()> {
    if resource.is_external() {
        Ok(())
    } else {
        Err(StorageError::InvalidLocator {
            locator: resource.to_string(),
            reason: "not an external resource".to_string(),
        })
    }
}

/// Executes task bodies
///
/// Returns a short success message for the SUCCESS notification.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task) -> Result<String>;
}

/// Production task runner
pub struct TaskContext {
    copier: TreeCopier,
    indexer: IndexerSync,
    metadata: Arc<dyn MetadataService>,
    pipeline: Arc<PublicationPipeline>,
    queue: Arc<TaskQueue>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("copier", &self.copier)
            .field("indexer", &self.indexer)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl TaskContext {
    /// Copies request their destination index through `queue`
    pub fn new(
        files: Arc<FileManagerRegistry>,
        index: Arc<dyn SearchIndex>,
        metadata: Arc<dyn MetadataService>,
        pipeline: Arc<PublicationPipeline>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            copier: TreeCopier::new(files.clone(), queue.clone()),
            indexer: IndexerSync::new(index, files),
            metadata,
            pipeline,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    async fn chain(&self, next: Task) -> Result<()> {
        info!("Chaining {}", next);
        self.queue.submit(next).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskRunner for TaskContext {
    async fn run(&self, task: &Task) -> Result<String> {
        let pipeline = &self.pipeline;
        let metadata = self.metadata.as_ref();

        match task {
            Task::Transfer(transfer) => {
                let report = self
                    .copier
                    .copy(&transfer.source, &transfer.destination)
                    .await?;
                Ok(format!(
                    "Copied {} to {}: {}",
                    transfer.source,
                    transfer.destination,
                    report.summary()
                ))
            }
            Task::IndexOrUpdateProject { project_uuid } => {
                let outcome =
                    projects::index_or_update_project(metadata, &self.indexer, project_uuid).await?;
                Ok(format!("Indexed project {project_uuid}: {outcome:?}"))
            }
            Task::ReindexProjects => {
                let queued = projects::reindex_projects(metadata, &self.queue).await?;
                Ok(format!("Queued {queued} project(s) for reindexing"))
            }
            Task::SetProjectId { project_uuid } => {
                let project_id = projects::set_project_id(metadata, &self.queue, project_uuid).await?;
                Ok(format!("Assigned {project_id} to {project_uuid}"))
            }
            Task::IndexFiles { locator, depth } => {
                let indexed = self.indexer.index_files(locator, *depth).await?;
                Ok(format!("Indexed {indexed} entries under {locator}"))
            }
            Task::CheckProjectFilesMetaPems { project_uuid } => {
                let checked = projects::check_project_files_meta_pems(metadata, project_uuid).await?;
                Ok(format!("Checked permissions of {checked} record(s)"))
            }
            Task::CheckProjectMetaPems { metadata_uuid } => {
                let project_uuid = projects::check_project_meta_pems(metadata, metadata_uuid).await?;
                Ok(format!("Matched permissions of {metadata_uuid} to {project_uuid}"))
            }
            Task::SetFaclProject {
                project_uuid,
                usernames,
            } => {
                let jobs = projects::set_facl_project(metadata, project_uuid, usernames).await?;
                Ok(format!("Submitted {} ACL job(s) for {project_uuid}", jobs.len()))
            }
            Task::FreezePublicationMeta {
                project_id,
                entity_uuids,
            } => {
                let outcome = pipeline.freeze_metadata(project_id, entity_uuids).await?;
                Ok(format!("Metadata freeze for {project_id} {outcome}"))
            }
            Task::SavePublication {
                project_id,
                entity_uuids,
            } => {
                let outcome = pipeline.save_publication(project_id, entity_uuids).await?;
                self.chain(Task::CopyPublicationFilesToArchive {
                    project_id: project_id.clone(),
                })
                .await?;
                Ok(format!("Publication {project_id} saved: {outcome}"))
            }
            Task::CopyPublicationFilesToArchive { project_id } => {
                let outcome = pipeline.copy_files_to_archive(project_id).await?;
                self.chain(Task::SaveToPreservation {
                    project_id: project_id.clone(),
                })
                .await?;
                Ok(format!("Archive copy of {project_id} {outcome}"))
            }
            Task::SaveToPreservation { project_id } => {
                let outcome = pipeline.save_to_preservation(project_id).await?;
                self.chain(Task::SwapFileTagUuids {
                    project_id: project_id.clone(),
                })
                .await?;
                Ok(format!("Preservation of {project_id} {outcome}"))
            }
            Task::SwapFileTagUuids { project_id } => {
                let outcome = pipeline.swap_file_tags(project_id).await?;
                let state = pipeline.manager().state(project_id).await?;
                self.chain(Task::SetPublishStatus {
                    project_id: project_id.clone(),
                    entity_uuids: state.entity_uuids,
                })
                .await?;
                Ok(format!("File tags of {project_id} {outcome}"))
            }
            Task::SetPublishStatus {
                project_id,
                entity_uuids,
            } => {
                let outcome = pipeline.set_publish_status(project_id, entity_uuids).await?;
                Ok(format!("Publication {project_id} {outcome}"))
            }
            Task::ZipPublicationFiles { project_id } => {
                let outcome = pipeline.zip_publication_files(project_id).await?;
                Ok(format!("Bundle of {project_id} {outcome}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_and_policies() {
        assert_eq!(Task::ReindexProjects.queue(), queues::API);
        assert!(Task::ReindexProjects.retry_policy().is_none());

        let archive = Task::CopyPublicationFilesToArchive {
            project_id: "PRJ-1".to_string(),
        };
        assert_eq!(archive.queue(), queues::DEFAULT);
        assert_eq!(archive.retry_policy().unwrap().max_retries, 5);
        assert_eq!(archive.operation(), "copy_publication_files_to_corral");

        let save = Task::SaveToPreservation {
            project_id: "PRJ-1".to_string(),
        };
        let policy = save.retry_policy().unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay, retry::PRESERVATION_DELAY);
    }

    #[test]
    fn test_bundle_and_single_record_tasks() {
        let zip = Task::ZipPublicationFiles {
            project_id: "PRJ-1".to_string(),
        };
        assert_eq!(zip.queue(), queues::DEFAULT);
        assert_eq!(zip.operation(), "zip_publication_files");
        assert_eq!(zip.event_type(), notifications::PUBLICATION_EVENT);
        assert_eq!(
            zip.retry_policy().unwrap().max_retries,
            retry::BUNDLE_MAX_RETRIES
        );
        assert_eq!(zip.to_string(), "zip_publication_files PRJ-1");

        let check = Task::CheckProjectMetaPems {
            metadata_uuid: "m-1".to_string(),
        };
        assert_eq!(check.queue(), queues::DEFAULT);
        assert!(check.retry_policy().is_none());
        assert_eq!(check.event_type(), notifications::PROJECT_EVENT);
        assert_eq!(check.notification_extra()["metadata_uuid"], "m-1");
        let value = serde_json::to_value(&check).unwrap();
        assert_eq!(value["task"], "check_project_meta_pems");
    }

    #[test]
    fn test_transfer_constructors() {
        let task = Task::external_resource_upload("alice", Resource::Dropbox, "alice/a.txt", "up")
            .unwrap();
        assert_eq!(task.operation(), "external_resource_upload");
        assert_eq!(task.username(), "alice");
        assert!(task.notifies_progress());

        let err = Task::external_resource_download("alice", Resource::Public, "x", "alice")
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidLocator { .. }));

        let task = Task::copy_public_to_mydata("bob", "NEES-1/data", "bob");
        let extra = task.notification_extra();
        assert_eq!(extra["system"], "agave");
        assert_eq!(extra["src_file_id"], "NEES-1/data");
        assert_eq!(extra["src_resource"], "public");
    }

    #[test]
    fn test_service_tasks_notify_service_account() {
        let task = Task::SetProjectId {
            project_uuid: "p-1".to_string(),
        };
        assert_eq!(task.username(), project_constants::SERVICE_ACCOUNT);
        assert!(!task.notifies_progress());
        assert_eq!(task.to_string(), "set_project_id p-1");
    }

    #[test]
    fn test_task_serialization_is_tagged() {
        let task = Task::SetFaclProject {
            project_uuid: "p-1".to_string(),
            usernames: vec!["alice".to_string()],
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["task"], "set_facl_project");
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_record_retry_bumps_transfer_count() {
        let mut task = Task::copy_public_to_mydata("bob", "NEES-1", "bob");
        task.record_retry();
        match task {
            Task::Transfer(t) => assert_eq!(t.retry_count, 1),
            other => panic!("unexpected task {:?}", other),
        }
    }
}
