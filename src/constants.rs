//! Application constants for the DesignSafe task layer
//!
//! Grouped by functional domain. Values that deployments need to change live
//! in [`crate::config`]; these are the defaults and fixed protocol values.

use std::time::Duration;

/// Queue names used for routing
pub mod queues {
    /// General-purpose queue for user-triggered work
    pub const DEFAULT: &str = "default";

    /// Metadata and project-record maintenance
    pub const API: &str = "api";

    /// Search index refreshes
    pub const INDEXING: &str = "indexing";
}

/// Pagination and tree walking
pub mod listing {
    /// Page size used for every paginated listing
    pub const PAGE_SIZE: usize = 100;

    /// Chunk size for streamed reads from mounted backends (64KB)
    pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

    /// Names excluded from the project-root fallback listing
    pub const EXCLUDED_PROJECT_ENTRIES: [&str; 2] = [".", "Trash"];
}

/// POSIX modes applied by the archive stage and folder creation
pub mod modes {
    /// Mode for newly created folders on mounted backends
    pub const FOLDER: u32 = 0o755;

    /// Published root while the archive stage is writing
    pub const WRITABLE_ROOT: u32 = 0o755;

    /// Archived directories and the stable published root
    pub const READ_ONLY_DIR: u32 = 0o555;

    /// Archived files
    pub const READ_ONLY_FILE: u32 = 0o444;

    /// Files temporarily unlocked so a re-run can overwrite them
    pub const WRITABLE_FILE: u32 = 0o644;
}

/// Downloadable publication bundles
pub mod bundles {
    /// Directory under the published root holding the bundles
    pub const DIRECTORY: &str = "archives";

    /// Appended to the project id to name its bundle
    pub const FILE_SUFFIX: &str = "_archive.zip";
}

/// Retry policies declared by the task catalogue
pub mod retry {
    use super::Duration;

    /// Default retry count for user transfers
    pub const TRANSFER_MAX_RETRIES: u32 = 3;

    /// Default delay before a retried task runs again
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(180);

    /// Metadata freeze and DOI draft stages
    pub const FREEZE_MAX_RETRIES: u32 = 1;
    pub const FREEZE_DELAY: Duration = Duration::from_secs(60);

    /// Archive copy stage
    pub const ARCHIVE_MAX_RETRIES: u32 = 5;

    /// Preservation mirror stage and ACL jobs
    pub const PRESERVATION_MAX_RETRIES: u32 = 5;
    pub const PRESERVATION_DELAY: Duration = Duration::from_secs(60);

    /// File-tag swap stage
    pub const FILE_TAG_MAX_RETRIES: u32 = 3;

    /// Zip bundle of an archived publication
    pub const BUNDLE_MAX_RETRIES: u32 = 3;

    /// Upper bound for exponential retry delays
    pub const MAX_DELAY: Duration = Duration::from_secs(3600);

    /// Jitter factor for randomizing exponential delays (0.0-1.0)
    pub const JITTER_FACTOR: f64 = 0.1;
}

/// Worker and dispatcher configuration
pub mod workers {
    use super::Duration;

    /// Default number of workers per pool
    pub const DEFAULT_WORKER_COUNT: usize = 4;

    /// Maximum recommended concurrent workers
    pub const MAX_WORKER_COUNT: usize = 32;

    /// Maximum active tasks before submissions are rejected
    pub const MAX_PENDING_TASKS: usize = 50_000;

    /// Base sleep when a worker finds no runnable task
    pub const IDLE_SLEEP: Duration = Duration::from_millis(100);

    /// Cap on the idle sleep backoff
    pub const MAX_IDLE_SLEEP_MS: u64 = 2_000;

    /// Exponent cap for the idle sleep backoff
    pub const MAX_BACKOFF_MULTIPLIER: u32 = 5;
}

/// Project metadata records
pub mod projects {
    /// Name of project metadata records
    pub const PROJECT_RECORD_NAME: &str = "designsafe.project";

    /// Prefix for allocated project ids
    pub const PROJECT_ID_PREFIX: &str = "PRJ-";

    /// How many successive numbers are tried before taking the last one
    pub const ID_COLLISION_ATTEMPTS: u32 = 10;

    /// Application id of the ACL job
    pub const SETFACL_APP_ID: &str = "setfacl_corral3-0.1";

    /// Username the maintenance tasks run as
    pub const SERVICE_ACCOUNT: &str = "ds_admin";
}

/// Preservation repository
pub mod preservation {
    use super::Duration;

    /// Default repository REST base
    pub const DEFAULT_BASE_URL: &str = "http://fedoraweb01.tacc.utexas.edu:8080/fcrepo/rest";

    /// Namespace container holding all publications
    pub const DEFAULT_NAMESPACE: &str = "publications_01";

    /// Requests per second against the repository
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;

    /// Per-request timeout
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Budget for the backoff retry loop on 429/503/connection errors
    pub const MAX_ELAPSED_RETRY: Duration = Duration::from_secs(300);

    /// Content type used when detection has nothing to go on
    pub const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";
}

/// Notification vocabulary
pub mod notifications {
    /// Event type for data-depot file operations
    pub const DATA_EVENT: &str = "data";

    /// Event type for publication stages
    pub const PUBLICATION_EVENT: &str = "publication";

    /// Event type for project maintenance tasks
    pub const PROJECT_EVENT: &str = "project";
}

/// Logging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

pub use listing::PAGE_SIZE;
pub use workers::DEFAULT_WORKER_COUNT;
