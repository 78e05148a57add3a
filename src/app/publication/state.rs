//! Publication progress records

use std::fmt;

use serde::{Deserialize, Serialize};

/// Completed stage of a publication, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationStage {
    #[default]
    Draft,
    MetadataFrozen,
    FilesArchived,
    Preserved,
    FileTagsSwapped,
    Published,
}

impl PublicationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStage::Draft => "DRAFT",
            PublicationStage::MetadataFrozen => "METADATA_FROZEN",
            PublicationStage::FilesArchived => "FILES_ARCHIVED",
            PublicationStage::Preserved => "PRESERVED",
            PublicationStage::FileTagsSwapped => "FILE_TAGS_SWAPPED",
            PublicationStage::Published => "PUBLISHED",
        }
    }

    pub fn next(&self) -> Option<PublicationStage> {
        match self {
            PublicationStage::Draft => Some(PublicationStage::MetadataFrozen),
            PublicationStage::MetadataFrozen => Some(PublicationStage::FilesArchived),
            PublicationStage::FilesArchived => Some(PublicationStage::Preserved),
            PublicationStage::Preserved => Some(PublicationStage::FileTagsSwapped),
            PublicationStage::FileTagsSwapped => Some(PublicationStage::Published),
            PublicationStage::Published => None,
        }
    }
}

impl fmt::Display for PublicationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a project's publication stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPublicationState {
    pub project_id: String,
    #[serde(default)]
    pub entity_uuids: Vec<String>,
    pub stage: PublicationStage,
    /// Draft identifier, once created
    #[serde(default)]
    pub doi: Option<String>,
}

impl ProjectPublicationState {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            entity_uuids: Vec::new(),
            stage: PublicationStage::Draft,
            doi: None,
        }
    }

    /// Move forward to `stage`; never moves backwards
    ///
    /// Returns whether the stage changed.
    pub fn advance(&mut self, stage: PublicationStage) -> bool {
        if stage > self.stage {
            self.stage = stage;
            true
        } else {
            false
        }
    }

    pub fn has_completed(&self, stage: PublicationStage) -> bool {
        self.stage >= stage
    }
}
