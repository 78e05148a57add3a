//! Configuration management for the DesignSafe task layer
//!
//! A single TOML file configures the deployment environment, the storage
//! roots behind each resource, the archive and preservation targets, and the
//! queue and worker pool. Every section has defaults, so a missing file or a
//! partial one still yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::dispatcher::DispatcherConfig;
use crate::app::files::FileManagerRegistry;
use crate::app::models::{Environment, Resource};
use crate::app::publication::{PipelineConfig, PreservationConfig};
use crate::app::queue::TaskQueueConfig;
use crate::constants::{logging, preservation, queues, workers};
use crate::errors::{AppError, ConfigError, Result};

const CONFIG_FILE_NAME: &str = "designsafe-tasks.toml";

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment; archive and preservation only act in production
    pub environment: Environment,
    pub storage: StorageConfigToml,
    pub archive: ArchiveConfigToml,
    pub preservation: PreservationConfigToml,
    pub queue: QueueConfigToml,
    pub dispatcher: DispatcherConfigToml,
    pub logging: LoggingConfig,
}

/// Filesystem root mounted for each resource; unset resources are unavailable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfigToml {
    pub agave: Option<PathBuf>,
    pub public: Option<PathBuf>,
    #[serde(rename = "box")]
    pub box_root: Option<PathBuf>,
    pub dropbox: Option<PathBuf>,
    pub googledrive: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfigToml {
    /// Read-only archive of published projects
    pub published_root: PathBuf,
    /// Directory holding one folder per project uuid
    pub projects_root: PathBuf,
}

impl Default for ArchiveConfigToml {
    fn default() -> Self {
        Self {
            published_root: PathBuf::from("./published"),
            projects_root: PathBuf::from("./projects"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreservationConfigToml {
    pub base_url: String,
    pub namespace: String,
    pub rate_limit_rps: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for PreservationConfigToml {
    fn default() -> Self {
        Self {
            base_url: preservation::DEFAULT_BASE_URL.to_string(),
            namespace: preservation::DEFAULT_NAMESPACE.to_string(),
            rate_limit_rps: preservation::DEFAULT_RATE_LIMIT_RPS,
            request_timeout: preservation::REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfigToml {
    /// Active tasks allowed before submissions are rejected
    pub max_pending_items: usize,
    /// Cap applied to every retry delay (unset keeps policy delays)
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Option<Duration>,
}

impl Default for QueueConfigToml {
    fn default() -> Self {
        Self {
            max_pending_items: workers::MAX_PENDING_TASKS,
            max_retry_delay: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfigToml {
    pub worker_count: usize,
    pub queues: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub idle_sleep: Duration,
}

impl Default for DispatcherConfigToml {
    fn default() -> Self {
        Self {
            worker_count: workers::DEFAULT_WORKER_COUNT,
            queues: vec![
                queues::DEFAULT.to_string(),
                queues::API.to_string(),
                queues::INDEXING.to_string(),
            ],
            idle_sleep: workers::IDLE_SLEEP,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> (TaskQueueConfig, DispatcherConfig, PipelineConfig) {
        (
            self.queue.to_runtime_config(),
            self.dispatcher.to_runtime_config(),
            PipelineConfig::new(
                self.environment,
                &self.archive.published_root,
                &self.archive.projects_root,
            )
            .with_namespace(&self.preservation.namespace),
        )
    }

    pub fn preservation_config(&self) -> PreservationConfig {
        self.preservation.to_runtime_config()
    }

    /// File managers for every configured storage root
    pub fn file_manager_registry(&self) -> FileManagerRegistry {
        FileManagerRegistry::from_roots(self.storage.roots())
    }

    /// Reject settings the runtime would refuse later
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let (queue, dispatcher, _) = self.to_runtime_config();

        if let Err(e) = queue.validate() {
            errors.push(format!("[queue] {}", e));
        }
        if let Err(e) = dispatcher.validate() {
            errors.push(format!("[dispatcher] {}", e));
        }
        if let Some(unknown) = dispatcher.queues.iter().find(|q| !queue.queues.contains(q)) {
            errors.push(format!("[dispatcher] unknown queue {}", unknown));
        }
        if self.preservation.rate_limit_rps == 0 {
            errors.push("[preservation] rate_limit_rps must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors }.into())
        }
    }

    /// Load configuration: an explicit file, else the first file found in
    /// the standard locations, else defaults
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path }.into());
                }
                Some(path)
            }
            None => Self::find_config_file()?,
        };

        let config = match config_path {
            Some(path) => Self::load_from_file(&path).await?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Write the commented default configuration to `path`
    pub async fn write_default_config(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::generic(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(path, Self::generate_default_config_content())
            .await
            .map_err(|e| {
                AppError::generic(format!(
                    "Failed to write config file {}: {}",
                    path.display(),
                    e
                ))
            })
    }

    fn find_config_file() -> Result<Option<PathBuf>> {
        let search_paths = vec![
            PathBuf::from(format!("./{}", CONFIG_FILE_NAME)),
            Self::get_default_config_path()?,
            #[cfg(unix)]
            PathBuf::from("/etc/designsafe-tasks/config.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Default config file path for the current user
    pub fn get_default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;
        Ok(config_dir.join("designsafe-tasks").join("config.toml"))
    }

    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::generic(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::InvalidFormat)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Default configuration with comments
    pub fn generate_default_config_content() -> String {
        format!(
            r#"# DesignSafe task layer configuration
# Every setting is optional; omitted values fall back to these defaults.

# Deployment environment: "dev", "staging", or "default" (production).
# The archive copy and preservation stages only act in production.
environment = "dev"

[storage]
# Filesystem root mounted for each resource. Unset resources are unavailable.
# agave = "/corral-repl/tacc/NHERI/shared"
# public = "/corral-repl/tacc/NHERI/public"
# box = "/mnt/box"
# dropbox = "/mnt/dropbox"
# googledrive = "/mnt/googledrive"

[archive]
published_root = "./published"
projects_root = "./projects"

[preservation]
base_url = "{}"
namespace = "{}"
rate_limit_rps = {}
request_timeout = "{}s"

[queue]
max_pending_items = {}
# Cap every retry delay, e.g. for dry runs
# max_retry_delay = "30s"

[dispatcher]
worker_count = {}
queues = ["default", "api", "indexing"]
idle_sleep = "{}ms"

[logging]
level = "{}"  # error, warn, info, debug, trace
"#,
            preservation::DEFAULT_BASE_URL,
            preservation::DEFAULT_NAMESPACE,
            preservation::DEFAULT_RATE_LIMIT_RPS,
            preservation::REQUEST_TIMEOUT.as_secs(),
            workers::MAX_PENDING_TASKS,
            workers::DEFAULT_WORKER_COUNT,
            workers::IDLE_SLEEP.as_millis(),
            logging::DEFAULT_LOG_LEVEL,
        )
    }
}

impl StorageConfigToml {
    /// Configured (resource, root) pairs
    pub fn roots(&self) -> Vec<(Resource, PathBuf)> {
        [
            (Resource::Agave, &self.agave),
            (Resource::Public, &self.public),
            (Resource::Box, &self.box_root),
            (Resource::Dropbox, &self.dropbox),
            (Resource::GoogleDrive, &self.googledrive),
        ]
        .into_iter()
        .filter_map(|(resource, root)| root.clone().map(|root| (resource, root)))
        .collect()
    }
}

impl PreservationConfigToml {
    pub fn to_runtime_config(&self) -> PreservationConfig {
        PreservationConfig {
            base_url: self.base_url.clone(),
            namespace: self.namespace.clone(),
            rate_limit_rps: self.rate_limit_rps,
            request_timeout: self.request_timeout,
        }
    }
}

impl QueueConfigToml {
    pub fn to_runtime_config(&self) -> TaskQueueConfig {
        let config = TaskQueueConfig::default().with_max_pending_items(self.max_pending_items);
        match self.max_retry_delay {
            Some(delay) => config.with_max_retry_delay(delay),
            None => config,
        }
    }
}

impl DispatcherConfigToml {
    pub fn to_runtime_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_count,
            queues: self.queues.clone(),
            idle_sleep: self.idle_sleep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.dispatcher.worker_count, workers::DEFAULT_WORKER_COUNT);
        assert_eq!(config.logging.level, "info");
        assert!(config.storage.roots().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_content_parses_to_defaults() {
        let content = AppConfig::generate_default_config_content();
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[tokio::test]
    async fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppConfig::load(Some(temp_dir.path().join("missing.toml"))).await;
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
environment = "default"

[storage]
agave = "/data/shared"
box = "/mnt/box"

[archive]
published_root = "/data/published"

[preservation]
request_timeout = "30s"

[queue]
max_retry_delay = "1m"

[logging]
level = "debug"
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load(Some(path)).await.unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.preservation.request_timeout, Duration::from_secs(30));
        assert_eq!(
            config.storage.roots(),
            vec![
                (Resource::Agave, PathBuf::from("/data/shared")),
                (Resource::Box, PathBuf::from("/mnt/box")),
            ]
        );

        let (queue, dispatcher, pipeline) = config.to_runtime_config();
        assert_eq!(queue.max_retry_delay, Some(Duration::from_secs(60)));
        assert_eq!(dispatcher.worker_count, workers::DEFAULT_WORKER_COUNT);
        assert_eq!(pipeline.published_root, PathBuf::from("/data/published"));
        assert_eq!(pipeline.projects_root, PathBuf::from("./projects"));

        let registry = config.file_manager_registry();
        assert!(registry.contains(Resource::Agave));
        assert!(!registry.contains(Resource::Public));
    }

    #[tokio::test]
    async fn test_invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            "[dispatcher]\nworker_count = 0\nqueues = [\"default\", \"nightly\"]\n",
        )
        .await
        .unwrap();

        match AppConfig::load(Some(path)).await {
            Err(AppError::Config(ConfigError::ValidationFailed { errors })) => {
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        tokio::fs::write(&path, "environment = [").await.unwrap();
        assert!(matches!(
            AppConfig::load(Some(path)).await,
            Err(AppError::Config(ConfigError::InvalidFormat(_)))
        ));
    }
}
