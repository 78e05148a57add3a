//! Error types for the DesignSafe task layer
//!
//! Each concern gets its own error enum; [`AppError`] wraps them all for code
//! that crosses concerns (task handlers, the CLI). Every error can be
//! classified into an [`ErrorKind`], which is what the dispatcher and the tree
//! copier use to decide between retrying, skipping, and failing.

use std::path::PathBuf;

use thiserror::Error;

/// Classification used at task and tree-walk boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeouts, rate limits, unreachable backends. Safe to retry.
    TransientRemote,
    /// The locator or record does not exist. Retrying will not help.
    NotFound,
    /// Authorization failures and misconfiguration. Never retried.
    PermissionConfig,
    /// Anything not classified above
    Unclassified,
}

impl ErrorKind {
    /// Whether a task failing with this kind may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientRemote | ErrorKind::Unclassified)
    }

    /// Whether a tree walk must abort on this kind instead of skipping the entry
    pub fn aborts_tree_walk(&self) -> bool {
        matches!(self, ErrorKind::TransientRemote | ErrorKind::PermissionConfig)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientRemote => "transient-remote",
            ErrorKind::NotFound => "not-found",
            ErrorKind::PermissionConfig => "permission-config",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

/// Storage backend errors raised by file managers
#[derive(Error, Debug)]
pub enum StorageError {
    /// Locator does not resolve to anything on the backend
    #[error("Locator not found: {locator}")]
    NotFound { locator: String },

    /// Listing or writing into something that is not a folder
    #[error("Not a folder: {locator}")]
    NotAFolder { locator: String },

    /// Reading something that is not a file
    #[error("Not a file: {locator}")]
    NotAFile { locator: String },

    /// Backend could not be reached or timed out
    #[error("Backend {resource} unreachable: {reason}")]
    Unavailable { resource: String, reason: String },

    /// Backend refused the request because of rate limiting
    #[error("Backend {resource} rate limited the request")]
    RateLimited { resource: String },

    /// Credentials do not grant access to the locator
    #[error("Permission denied for {locator}")]
    PermissionDenied { locator: String },

    /// Malformed locator
    #[error("Invalid locator {locator}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// Resource tag does not name a known backend
    #[error("Unknown resource tag: {tag}")]
    UnknownResource { tag: String },

    /// Known backend without a configured file manager
    #[error("No file manager configured for resource {resource}")]
    NotConfigured { resource: String },

    /// I/O error on a mounted backend
    #[error("Storage I/O error")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Unavailable { .. }
            | StorageError::RateLimited { .. }
            | StorageError::Io(_) => ErrorKind::TransientRemote,
            StorageError::NotFound { .. }
            | StorageError::NotAFolder { .. }
            | StorageError::NotAFile { .. } => ErrorKind::NotFound,
            StorageError::PermissionDenied { .. }
            | StorageError::UnknownResource { .. }
            | StorageError::NotConfigured { .. } => ErrorKind::PermissionConfig,
            StorageError::InvalidLocator { .. } => ErrorKind::Unclassified,
        }
    }
}

/// Search index errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// Index backend could not be reached
    #[error("Search index unavailable: {reason}")]
    Unavailable { reason: String },

    /// Document id passed to replace/delete does not exist
    #[error("Indexed document not found: {doc_id}")]
    DocumentNotFound { doc_id: String },

    /// Canonical record is missing its key or has the wrong shape
    #[error("Invalid record for indexing: {reason}")]
    InvalidRecord { reason: String },
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::Unavailable { .. } => ErrorKind::TransientRemote,
            IndexError::DocumentNotFound { .. } => ErrorKind::NotFound,
            IndexError::InvalidRecord { .. } => ErrorKind::Unclassified,
        }
    }
}

/// Errors from the metadata service reached with the service account
#[derive(Error, Debug)]
pub enum MetadataError {
    /// No record with this uuid
    #[error("Metadata record not found: {uuid}")]
    NotFound { uuid: String },

    /// The project id counter record does not exist
    #[error("No project id counter record found")]
    MissingIdCounter,

    /// Metadata service could not be reached
    #[error("Metadata service unavailable: {reason}")]
    Unavailable { reason: String },
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::NotFound { .. } => ErrorKind::NotFound,
            MetadataError::MissingIdCounter => ErrorKind::PermissionConfig,
            MetadataError::Unavailable { .. } => ErrorKind::TransientRemote,
        }
    }
}

/// Preservation repository errors
#[derive(Error, Debug)]
pub enum PreservationError {
    /// HTTP transport failure
    #[error("Preservation repository request failed")]
    Http(#[from] reqwest::Error),

    /// Repository answered with an unexpected status
    #[error("Preservation repository returned HTTP {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Rate limit exceeded after retries
    #[error("Preservation repository rate limit exceeded")]
    RateLimitExceeded,

    /// Repository overloaded after retries
    #[error("Preservation repository overloaded (HTTP 503)")]
    ServerOverloaded,

    /// Base URL or resource path could not be turned into a URL
    #[error("Invalid preservation URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Reading the archived tree failed
    #[error("Failed to read archived file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rate limiter could not be configured
    #[error("Invalid preservation client configuration: {reason}")]
    Configuration { reason: String },
}

impl PreservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreservationError::Http(_)
            | PreservationError::RateLimitExceeded
            | PreservationError::ServerOverloaded
            | PreservationError::Io { .. } => ErrorKind::TransientRemote,
            PreservationError::UnexpectedStatus { status, .. } if *status >= 500 => {
                ErrorKind::TransientRemote
            }
            PreservationError::UnexpectedStatus { status, .. } if *status == 404 => {
                ErrorKind::NotFound
            }
            PreservationError::UnexpectedStatus { status, .. }
                if *status == 401 || *status == 403 =>
            {
                ErrorKind::PermissionConfig
            }
            PreservationError::UnexpectedStatus { .. } => ErrorKind::Unclassified,
            PreservationError::InvalidUrl { .. } | PreservationError::Configuration { .. } => {
                ErrorKind::PermissionConfig
            }
        }
    }
}

/// Publication pipeline errors
#[derive(Error, Debug)]
pub enum PublicationError {
    /// No publication record for the project id
    #[error("Publication not found: {project_id}")]
    NotFound { project_id: String },

    /// Publication record service failed
    #[error("Publication service unavailable: {reason}")]
    Unavailable { reason: String },

    /// Structural archive failure (not a per-path error, those are skipped)
    #[error("Archive operation failed on {path}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Project storage root for the fallback listing does not exist
    #[error("Project storage root not found: {path}")]
    ProjectRootMissing { path: PathBuf },

    /// Nothing has been archived for the project yet
    #[error("No archived files for {project_id}")]
    ArchiveMissing { project_id: String },

    /// Writing the zip bundle failed
    #[error("Failed to write publication bundle {path}")]
    Bundle {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Mirroring to the preservation repository failed
    #[error(transparent)]
    Preservation(#[from] PreservationError),
}

impl PublicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublicationError::NotFound { .. }
            | PublicationError::ProjectRootMissing { .. }
            | PublicationError::ArchiveMissing { .. } => ErrorKind::NotFound,
            PublicationError::Unavailable { .. }
            | PublicationError::Archive { .. }
            | PublicationError::Bundle { .. } => ErrorKind::TransientRemote,
            PublicationError::Preservation(e) => e.kind(),
        }
    }
}

/// Task queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Queue already holds the maximum number of active tasks
    #[error("Task queue overflow. Queue capacity: {capacity}")]
    QueueOverflow { capacity: usize },

    /// Task id is not known to the queue
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: u64 },

    /// Transition not allowed by the task state machine
    #[error("Invalid task state transition for task {task_id}: {from} -> {to}")]
    InvalidStateTransition {
        task_id: u64,
        from: &'static str,
        to: &'static str,
    },

    /// Queue name not served by this deployment
    #[error("Unknown queue: {name}")]
    UnknownQueue { name: String },

    /// Worker pool is not in a state that allows the operation
    #[error("Worker pool error: {reason}")]
    Pool { reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Preservation(#[from] PreservationError),

    #[error(transparent)]
    Publication(#[from] PublicationError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Task body panicked; caught at the dispatcher boundary
    #[error("Task panicked: {message}")]
    Panicked { message: String },

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Classify this error for retry and skip decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Storage(e) => e.kind(),
            AppError::Index(e) => e.kind(),
            AppError::Metadata(e) => e.kind(),
            AppError::Preservation(e) => e.kind(),
            AppError::Publication(e) => e.kind(),
            AppError::Config(_) => ErrorKind::PermissionConfig,
            AppError::Io(_) => ErrorKind::TransientRemote,
            AppError::Queue(_) | AppError::Panicked { .. } | AppError::Generic { .. } => {
                ErrorKind::Unclassified
            }
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::TransientRemote
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Storage(_) => "storage",
            AppError::Index(_) => "index",
            AppError::Metadata(_) => "metadata",
            AppError::Preservation(_) => "preservation",
            AppError::Publication(_) => "publication",
            AppError::Queue(_) => "queue",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Panicked { .. } => "panic",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Storage result type alias
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Index result type alias
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Metadata result type alias
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Preservation result type alias
pub type PreservationResult<T> = std::result::Result<T, PreservationError>;

/// Publication result type alias
pub type PublicationResult<T> = std::result::Result<T, PublicationError>;

/// Queue result type alias
pub type QueueResult<T> = std::result::Result<T, QueueError>;
