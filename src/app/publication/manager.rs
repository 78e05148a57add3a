//! Publication record access

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::state::ProjectPublicationState;
use crate::errors::{PublicationError, PublicationResult};

/// Publication records and identifier registration
///
/// Reached with the service account. Every method keyed by project id fails
/// with [`PublicationError::NotFound`] for unknown projects.
#[async_trait]
pub trait PublicationManager: Send + Sync {
    /// Current pipeline state
    async fn state(&self, project_id: &str) -> PublicationResult<ProjectPublicationState>;

    async fn save_state(&self, state: &ProjectPublicationState) -> PublicationResult<()>;

    /// Freeze the metadata of the listed entities into the publication record
    async fn freeze_metadata(&self, project_id: &str, entity_uuids: &[String]) -> PublicationResult<()>;

    /// Create draft identifiers; returns the existing one if already drafted
    async fn draft_identifier(&self, project_id: &str, entity_uuids: &[String]) -> PublicationResult<String>;

    /// File paths referenced by the publication, relative to the project root
    async fn related_file_paths(&self, project_id: &str) -> PublicationResult<Vec<String>>;

    /// Storage uuid of the project being published
    async fn project_uuid(&self, project_id: &str) -> PublicationResult<String>;

    async fn set_status(&self, project_id: &str, status: &str) -> PublicationResult<()>;

    /// Point file tags at the archived copies; returns the number rewritten
    async fn fix_file_tags(&self, project_id: &str) -> PublicationResult<usize>;

    /// Mark the publication published, registering identifiers when `publish_dois`
    async fn publish_resource(
        &self,
        project_id: &str,
        entity_uuids: &[String],
        publish_dois: bool,
    ) -> PublicationResult<()>;
}

#[derive(Debug, Clone)]
struct PublicationRecord {
    state: ProjectPublicationState,
    project_uuid: String,
    file_paths: Vec<String>,
    status: String,
    frozen: Vec<String>,
    drafts_created: u32,
    file_tags_fixed: usize,
    registered: bool,
}

#[derive(Debug, Default)]
struct ManagerState {
    records: HashMap<String, PublicationRecord>,
    unavailable_for: u32,
}

/// Publication records held in process
#[derive(Debug, Default)]
pub struct MemoryPublicationManager {
    state: Mutex<ManagerState>,
}

impl MemoryPublicationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publication(
        self,
        project_id: &str,
        project_uuid: &str,
        file_paths: &[&str],
    ) -> Self {
        self.lock().records.insert(
            project_id.to_string(),
            PublicationRecord {
                state: ProjectPublicationState::new(project_id),
                project_uuid: project_uuid.to_string(),
                file_paths: file_paths.iter().map(|p| p.to_string()).collect(),
                status: "publishing".to_string(),
                frozen: Vec::new(),
                drafts_created: 0,
                file_tags_fixed: 0,
                registered: false,
            },
        );
        self
    }

    /// Make the next `count` calls fail as unavailable
    pub fn fail_next(&self, count: u32) {
        self.lock().unavailable_for = count;
    }

    pub fn status(&self, project_id: &str) -> Option<String> {
        self.lock().records.get(project_id).map(|r| r.status.clone())
    }

    pub fn frozen_entities(&self, project_id: &str) -> Vec<String> {
        self.lock()
            .records
            .get(project_id)
            .map(|r| r.frozen.clone())
            .unwrap_or_default()
    }

    pub fn drafts_created(&self, project_id: &str) -> u32 {
        self.lock()
            .records
            .get(project_id)
            .map(|r| r.drafts_created)
            .unwrap_or(0)
    }

    pub fn file_tags_fixed(&self, project_id: &str) -> usize {
        self.lock()
            .records
            .get(project_id)
            .map(|r| r.file_tags_fixed)
            .unwrap_or(0)
    }

    pub fn is_registered(&self, project_id: &str) -> bool {
        self.lock()
            .records
            .get(project_id)
            .map(|r| r.registered)
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_record<T>(
        &self,
        project_id: &str,
        f: impl FnOnce(&mut PublicationRecord) -> T,
    ) -> PublicationResult<T> {
        let mut state = self.lock();
        if state.unavailable_for > 0 {
            state.unavailable_for -= 1;
            return Err(PublicationError::Unavailable {
                reason: "injected failure".to_string(),
            });
        }
        let record = state
            .records
            .get_mut(project_id)
            .ok_or_else(|| PublicationError::NotFound {
                project_id: project_id.to_string(),
            })?;
        Ok(f(record))
    }
}

#[async_trait]
impl PublicationManager for MemoryPublicationManager {
    async fn state(&self, project_id: &str) -> PublicationResult<ProjectPublicationState> {
        self.with_record(project_id, |r| r.state.clone())
    }

    async fn save_state(&self, state: &ProjectPublicationState) -> PublicationResult<()> {
        self.with_record(&state.project_id, |r| r.state = state.clone())
    }

    async fn freeze_metadata(&self, project_id: &str, entity_uuids: &[String]) -> PublicationResult<()> {
        self.with_record(project_id, |r| {
            for uuid in entity_uuids {
                if !r.frozen.contains(uuid) {
                    r.frozen.push(uuid.clone());
                }
            }
            r.state.entity_uuids = entity_uuids.to_vec();
        })
    }

    async fn draft_identifier(&self, project_id: &str, _entity_uuids: &[String]) -> PublicationResult<String> {
        self.with_record(project_id, |r| {
            if let Some(doi) = &r.state.doi {
                return doi.clone();
            }
            r.drafts_created += 1;
            let doi = format!("10.17603/ds2-{}", project_id.to_lowercase());
            r.state.doi = Some(doi.clone());
            doi
        })
    }

    async fn related_file_paths(&self, project_id: &str) -> PublicationResult<Vec<String>> {
        self.with_record(project_id, |r| r.file_paths.clone())
    }

    async fn project_uuid(&self, project_id: &str) -> PublicationResult<String> {
        self.with_record(project_id, |r| r.project_uuid.clone())
    }

    async fn set_status(&self, project_id: &str, status: &str) -> PublicationResult<()> {
        self.with_record(project_id, |r| r.status = status.to_string())
    }

    async fn fix_file_tags(&self, project_id: &str) -> PublicationResult<usize> {
        self.with_record(project_id, |r| {
            r.file_tags_fixed = r.file_paths.len();
            r.file_tags_fixed
        })
    }

    async fn publish_resource(
        &self,
        project_id: &str,
        _entity_uuids: &[String],
        publish_dois: bool,
    ) -> PublicationResult<()> {
        self.with_record(project_id, |r| {
            r.status = "published".to_string();
            r.registered |= publish_dois;
        })
    }
}
