//! Project maintenance tasks run with the service account

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::Task;
use crate::app::index::{IndexerSync, SyncOutcome};
use crate::app::queue::TaskQueue;
use crate::constants::{listing, projects};
use crate::errors::{MetadataError, MetadataResult, Result};

/// Job that applies a project's ACL for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclJob {
    pub name: String,
    #[serde(rename = "appId")]
    pub app_id: String,
    pub username: String,
    pub directory: String,
}

impl AclJob {
    pub fn for_project(project_uuid: &str, username: &str) -> Self {
        Self {
            name: "setfacl".to_string(),
            app_id: projects::SETFACL_APP_ID.to_string(),
            username: username.to_string(),
            directory: format!("projects/{project_uuid}"),
        }
    }
}

/// Metadata service reached with the service account
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Canonical project record
    async fn get_project(&self, uuid: &str) -> MetadataResult<Value>;

    /// One page of project records
    async fn list_projects(&self, offset: usize, limit: usize) -> MetadataResult<Vec<Value>>;

    /// Last allocated project number
    async fn id_counter(&self) -> MetadataResult<u64>;

    async fn save_id_counter(&self, value: u64) -> MetadataResult<()>;

    /// Whether some project already carries `project_id`
    async fn project_id_taken(&self, project_id: &str) -> MetadataResult<bool>;

    async fn set_project_id(&self, uuid: &str, project_id: &str) -> MetadataResult<()>;

    /// Uuids of file-metadata records associated with a project
    async fn file_metadata_for_project(&self, project_uuid: &str) -> MetadataResult<Vec<String>>;

    /// Uuid of the project a file-metadata record is associated with
    async fn project_for_file_metadata(&self, metadata_uuid: &str) -> MetadataResult<String>;

    /// Copy the project's permissions onto a file-metadata record
    async fn match_pems_to_project(&self, metadata_uuid: &str, project_uuid: &str) -> MetadataResult<()>;

    /// Submit an ACL job; returns the job id
    async fn submit_acl_job(&self, job: &AclJob) -> MetadataResult<String>;
}

/// Upsert one project into the search index
pub async fn index_or_update_project(
    metadata: &dyn MetadataService,
    indexer: &IndexerSync,
    project_uuid: &str,
) -> Result<SyncOutcome> {
    let record = metadata.get_project(project_uuid).await?;
    Ok(indexer.sync_project(&record).await?)
}

/// Queue a project index task for every project; returns how many
pub async fn reindex_projects(metadata: &dyn MetadataService, queue: &TaskQueue) -> Result<usize> {
    let mut offset = 0;
    let mut queued = 0;
    loop {
        let page = metadata.list_projects(offset, listing::PAGE_SIZE).await?;
        if page.is_empty() {
            break;
        }
        offset += listing::PAGE_SIZE;

        for project in page {
            let Some(uuid) = project.get("uuid").and_then(Value::as_str) else {
                debug!("Skipping project record without uuid");
                continue;
            };
            queue
                .submit(Task::IndexOrUpdateProject {
                    project_uuid: uuid.to_string(),
                })
                .await?;
            queued += 1;
        }
    }
    info!("Queued {} project(s) for reindexing", queued);
    Ok(queued)
}

/// Allocate the next free `PRJ-<n>` for a project
///
/// Starts one past the counter and skips numbers already taken, trying a
/// bounded number of times. Persists the id and the counter, then queues a
/// reindex of the project.
pub async fn set_project_id(
    metadata: &dyn MetadataService,
    queue: &TaskQueue,
    project_uuid: &str,
) -> Result<String> {
    metadata.get_project(project_uuid).await?;
    let mut number = metadata.id_counter().await? + 1;
    for _ in 0..projects::ID_COLLISION_ATTEMPTS {
        let candidate = format!("{}{}", projects::PROJECT_ID_PREFIX, number);
        if !metadata.project_id_taken(&candidate).await? {
            break;
        }
        debug!("{} is taken", candidate);
        number += 1;
    }

    let project_id = format!("{}{}", projects::PROJECT_ID_PREFIX, number);
    metadata.set_project_id(project_uuid, &project_id).await?;
    metadata.save_id_counter(number).await?;
    info!(project_uuid, "Assigned {}", project_id);

    queue
        .submit(Task::IndexOrUpdateProject {
            project_uuid: project_uuid.to_string(),
        })
        .await?;
    Ok(project_id)
}

/// Re-apply project permissions to its file metadata; returns records touched
pub async fn check_project_files_meta_pems(
    metadata: &dyn MetadataService,
    project_uuid: &str,
) -> Result<usize> {
    let records = metadata.file_metadata_for_project(project_uuid).await?;
    for uuid in &records {
        debug!("Checking permissions of {}", uuid);
        metadata.match_pems_to_project(uuid, project_uuid).await?;
    }
    Ok(records.len())
}

/// Re-apply project permissions to one file-metadata record
///
/// Returns the uuid of the project whose permissions were applied.
pub async fn check_project_meta_pems(metadata: &dyn MetadataService, metadata_uuid: &str) -> Result<String> {
    let project_uuid = metadata.project_for_file_metadata(metadata_uuid).await?;
    debug!("Checking permissions of {} against {}", metadata_uuid, project_uuid);
    metadata
        .match_pems_to_project(metadata_uuid, &project_uuid)
        .await?;
    Ok(project_uuid)
}

/// Submit one ACL job per user; returns the job ids
pub async fn set_facl_project(
    metadata: &dyn MetadataService,
    project_uuid: &str,
    usernames: &[String],
) -> Result<Vec<String>> {
    let mut job_ids = Vec::with_capacity(usernames.len());
    for username in usernames {
        let job = AclJob::for_project(project_uuid, username);
        let id = metadata.submit_acl_job(&job).await?;
        debug!("Submitted ACL job {} for {} on {}", id, username, job.directory);
        job_ids.push(id);
    }
    Ok(job_ids)
}

#[derive(Debug, Default)]
struct MetadataState {
    projects: BTreeMap<String, Value>,
    id_counter: Option<u64>,
    file_metadata: Vec<(String, String)>,
    matched: Vec<(String, String)>,
    acl_jobs: Vec<AclJob>,
    unavailable_for: u32,
}

/// Metadata service held in process
#[derive(Debug, Default)]
pub struct MemoryMetadataService {
    state: Mutex<MetadataState>,
}

impl MemoryMetadataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a project record; it must carry a string `uuid`
    pub fn with_project(self, record: Value) -> Self {
        if let Some(uuid) = record.get("uuid").and_then(Value::as_str) {
            let uuid = uuid.to_string();
            self.lock().projects.insert(uuid, record);
        }
        self
    }

    pub fn with_id_counter(self, value: u64) -> Self {
        self.lock().id_counter = Some(value);
        self
    }

    pub fn with_file_metadata(self, metadata_uuid: &str, project_uuid: &str) -> Self {
        self.lock()
            .file_metadata
            .push((metadata_uuid.to_string(), project_uuid.to_string()));
        self
    }

    /// Make the next `count` calls fail as unavailable
    pub fn fail_next(&self, count: u32) {
        self.lock().unavailable_for = count;
    }

    pub fn project(&self, uuid: &str) -> Option<Value> {
        self.lock().projects.get(uuid).cloned()
    }

    pub fn id_counter_value(&self) -> Option<u64> {
        self.lock().id_counter
    }

    pub fn acl_jobs(&self) -> Vec<AclJob> {
        self.lock().acl_jobs.clone()
    }

    /// `(metadata uuid, project uuid)` pairs whose permissions were matched
    pub fn matched(&self) -> Vec<(String, String)> {
        self.lock().matched.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MetadataState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checked(&self) -> MetadataResult<MutexGuard<'_, MetadataState>> {
        let mut state = self.lock();
        if state.unavailable_for > 0 {
            state.unavailable_for -= 1;
            return Err(MetadataError::Unavailable {
                reason: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl MetadataService for MemoryMetadataService {
    async fn get_project(&self, uuid: &str) -> MetadataResult<Value> {
        self.checked()?
            .projects
            .get(uuid)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound {
                uuid: uuid.to_string(),
            })
    }

    async fn list_projects(&self, offset: usize, limit: usize) -> MetadataResult<Vec<Value>> {
        Ok(self
            .checked()?
            .projects
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn id_counter(&self) -> MetadataResult<u64> {
        self.checked()?.id_counter.ok_or(MetadataError::MissingIdCounter)
    }

    async fn save_id_counter(&self, value: u64) -> MetadataResult<()> {
        self.checked()?.id_counter = Some(value);
        Ok(())
    }

    async fn project_id_taken(&self, project_id: &str) -> MetadataResult<bool> {
        Ok(self.checked()?.projects.values().any(|record| {
            record
                .pointer("/value/projectId")
                .and_then(Value::as_str)
                == Some(project_id)
        }))
    }

    async fn set_project_id(&self, uuid: &str, project_id: &str) -> MetadataResult<()> {
        let mut state = self.checked()?;
        let record = state
            .projects
            .get_mut(uuid)
            .ok_or_else(|| MetadataError::NotFound {
                uuid: uuid.to_string(),
            })?;
        if let Some(value) = record.get_mut("value").and_then(Value::as_object_mut) {
            value.insert("projectId".to_string(), Value::String(project_id.to_string()));
        }
        Ok(())
    }

    async fn file_metadata_for_project(&self, project_uuid: &str) -> MetadataResult<Vec<String>> {
        Ok(self
            .checked()?
            .file_metadata
            .iter()
            .filter(|(_, project)| project == project_uuid)
            .map(|(uuid, _)| uuid.clone())
            .collect())
    }

    async fn project_for_file_metadata(&self, metadata_uuid: &str) -> MetadataResult<String> {
        self.checked()?
            .file_metadata
            .iter()
            .find(|(uuid, _)| uuid == metadata_uuid)
            .map(|(_, project)| project.clone())
            .ok_or_else(|| MetadataError::NotFound {
                uuid: metadata_uuid.to_string(),
            })
    }

    async fn match_pems_to_project(&self, metadata_uuid: &str, project_uuid: &str) -> MetadataResult<()> {
        self.checked()?
            .matched
            .push((metadata_uuid.to_string(), project_uuid.to_string()));
        Ok(())
    }

    async fn submit_acl_job(&self, job: &AclJob) -> MetadataResult<String> {
        let mut state = self.checked()?;
        state.acl_jobs.push(job.clone());
        Ok(format!("job-{}", state.acl_jobs.len()))
    }
}
