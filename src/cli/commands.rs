//! Command handlers
//!
//! Each handler loads the configuration, builds the collaborators the command
//! needs, and reports the outcome on stdout. Transfers go through the same
//! queue and worker pool as in the deployed service, so retries and
//! notifications behave identically.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::app::copier::TreeCopier;
use crate::app::dispatcher::{create_shutdown_channel, Dispatcher, SignalHandler};
use crate::app::models::TransferTask;
use crate::app::notify::TracingNotifier;
use crate::app::publication::{
    FedoraClient, PreservationMirror, PublicationArchiver, PublicationBundler,
};
use crate::app::queue::{TaskId, TaskQueue, TaskStatus};
use crate::app::tasks::{Task, TaskRunner};
use crate::cli::{ArchiveArgs, BundleArgs, ConfigAction, ConfigArgs, CopyPublicArgs, MirrorArgs, TransferArgs};
use crate::config::AppConfig;
use crate::constants::queues;
use crate::errors::{AppError, QueueError, Result};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs transfers only; the CLI pool never claims other tasks
struct TransferRunner {
    copier: TreeCopier,
}

#[async_trait]
impl TaskRunner for TransferRunner {
    async fn run(&self, task: &Task) -> Result<String> {
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
            other => Err(AppError::generic(format!(
                "{} cannot run from the command line",
                other.operation()
            ))),
        }
    }
}

pub async fn handle_transfer(config: &AppConfig, args: TransferArgs) -> Result<()> {
    let mut transfer = TransferTask::new(args.user, args.source, args.destination);
    if let Some(max_retries) = args.max_retries {
        transfer = transfer.with_max_retries(max_retries);
    }
    run_transfer(config, Task::Transfer(transfer)).await
}

pub async fn handle_copy_public(config: &AppConfig, args: CopyPublicArgs) -> Result<()> {
    let task = Task::copy_public_to_mydata(&args.user, &args.source_path, &args.destination_path);
    run_transfer(config, task).await
}

async fn run_transfer(config: &AppConfig, task: Task) -> Result<()> {
    let start_time = Instant::now();
    let (queue_config, dispatcher_config, _) = config.to_runtime_config();

    let files = Arc::new(config.file_manager_registry());
    let queue = Arc::new(TaskQueue::with_config(queue_config)?);
    let runner = TransferRunner {
        copier: TreeCopier::new(files, queue.clone()),
    };

    let description = task.to_string();
    let task_id = queue.submit(task).await?;
    println!("Queued {} as {}", description, task_id);

    let mut dispatcher = Dispatcher::new(
        dispatcher_config.with_queues(&[queues::DEFAULT]),
        queue.clone(),
        Arc::new(runner),
        Arc::new(TracingNotifier),
    );
    dispatcher.start()?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let signal_handle = SignalHandler::new(shutdown_tx).setup();
    let finished = wait_for_task(&queue, task_id, shutdown_rx).await;
    signal_handle.abort();
    dispatcher.shutdown().await?;

    let record = queue
        .get(task_id)
        .await
        .ok_or(QueueError::TaskNotFound { task_id: task_id.0 })?;
    let pending_index_requests = queue.stats().await.pending;
    if pending_index_requests > 0 {
        info!(
            "{} index request(s) left for the indexing workers",
            pending_index_requests
        );
    }

    let attempts = record.attempts();
    match (finished, record.status) {
        (true, TaskStatus::Succeeded { .. }) => {
            println!(
                "✅ {} completed in {:.1}s after {} attempt(s)",
                task_id,
                start_time.elapsed().as_secs_f64(),
                attempts
            );
            Ok(())
        }
        (true, TaskStatus::Failed { error, .. }) => Err(AppError::generic(format!(
            "{} failed after {} attempt(s): {}",
            task_id, attempts, error
        ))),
        (_, status) => {
            warn!("Interrupted with {} in state {}", task_id, status.as_str());
            Err(AppError::generic(format!(
                "Interrupted before {} finished",
                task_id
            )))
        }
    }
}

/// Poll until the task is terminal; `false` when interrupted first
async fn wait_for_task(
    queue: &TaskQueue,
    task_id: TaskId,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> bool {
    loop {
        if let Some(record) = queue.get(task_id).await {
            if record.status.is_terminal() {
                return true;
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {}
            _ = shutdown_rx.recv() => return false,
        }
    }
}

pub async fn handle_archive(config: &AppConfig, args: ArchiveArgs) -> Result<()> {
    if !production_or_forced(config, args.force, "archive") {
        return Ok(());
    }

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress.set_message(args.project_id.clone());

    let bar = progress.clone();
    let archiver = PublicationArchiver::new(
        &config.archive.published_root,
        &config.archive.projects_root,
    )
    .with_progress(Arc::new(move |done: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    }));

    let paths = archiver.resolve_paths(&args.project_uuid, args.paths).await?;
    info!("Archiving {} path(s) for {}", paths.len(), args.project_id);
    let report = archiver
        .archive(&args.project_id, &args.project_uuid, paths)
        .await?;
    progress.finish_with_message("Archive complete");

    println!(
        "📦 Archived {} file(s) from {} path(s) into {}",
        report.files_copied,
        report.paths.len(),
        report.project_dir.display()
    );
    for (path, reason) in &report.skipped {
        println!("   skipped {}: {}", path, reason);
    }
    Ok(())
}

pub async fn handle_mirror(config: &AppConfig, args: MirrorArgs) -> Result<()> {
    if !production_or_forced(config, args.force, "mirror") {
        return Ok(());
    }

    let preservation = config.preservation_config();
    let client = FedoraClient::new(&preservation)?;
    let archived_root = config.archive.published_root.join(&args.project_id);
    if !archived_root.is_dir() {
        return Err(AppError::generic(format!(
            "No archived project at {}",
            archived_root.display()
        )));
    }

    let report = PreservationMirror::new(&client, &preservation.namespace)
        .mirror(&args.project_id, &archived_root)
        .await?;

    println!(
        "🏛  Mirrored {}: {} container(s), {} binaries, {} bytes",
        args.project_id, report.containers, report.binaries, report.bytes
    );
    Ok(())
}

pub async fn handle_bundle(config: &AppConfig, args: BundleArgs) -> Result<()> {
    if !production_or_forced(config, args.force, "bundle") {
        return Ok(());
    }

    let report = PublicationBundler::new(&config.archive.published_root)
        .bundle(&args.project_id)
        .await?;
    println!(
        "🗜  Bundled {} file(s), {} bytes into {}",
        report.files,
        report.bytes,
        report.path.display()
    );
    Ok(())
}

/// `explicit_path` is the global `--config` value, used as the init target
pub async fn handle_config(
    config: &AppConfig,
    args: ConfigArgs,
    explicit_path: Option<PathBuf>,
) -> Result<()> {
    match args.action {
        ConfigAction::Init { force } => {
            let path = match explicit_path {
                Some(path) => path,
                None => AppConfig::get_default_config_path()?,
            };
            if path.exists() && !force {
                println!("Configuration already exists: {}", path.display());
                println!("   Use --force to overwrite it.");
                return Ok(());
            }
            AppConfig::write_default_config(&path).await?;
            println!("📁 Wrote default configuration to {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let content = toml::to_string_pretty(config)
                .map_err(|e| AppError::generic(format!("Failed to render configuration: {}", e)))?;
            println!("{}", content);
            Ok(())
        }
    }
}

fn production_or_forced(config: &AppConfig, force: bool, command: &str) -> bool {
    if config.environment.is_production() || force {
        return true;
    }
    println!(
        "Skipping {}: environment is {}, use --force to run anyway",
        command, config.environment
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{FileLocator, Resource};
    use crate::config::StorageConfigToml;
    use tempfile::TempDir;

    fn config_with_roots(temp: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage = StorageConfigToml {
            agave: Some(temp.path().join("shared")),
            public: Some(temp.path().join("public")),
            ..Default::default()
        };
        config.archive.published_root = temp.path().join("published");
        config.archive.projects_root = temp.path().join("projects");
        config
    }

    #[tokio::test]
    async fn test_copy_public_runs_through_the_pool() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("public/NEES-1/data")).unwrap();
        std::fs::create_dir_all(temp.path().join("shared/alice")).unwrap();
        std::fs::write(temp.path().join("public/NEES-1/data/run.csv"), "1,2").unwrap();

        let config = config_with_roots(&temp);
        handle_copy_public(
            &config,
            CopyPublicArgs {
                source_path: "NEES-1/data".to_string(),
                destination_path: "alice".to_string(),
                user: "alice".to_string(),
            },
        )
        .await
        .unwrap();

        let copied = std::fs::read_to_string(temp.path().join("shared/alice/data/run.csv")).unwrap();
        assert_eq!(copied, "1,2");
    }

    #[tokio::test]
    async fn test_transfer_to_unconfigured_resource_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("shared/alice")).unwrap();
        std::fs::write(temp.path().join("shared/alice/a.txt"), "a").unwrap();

        let config = config_with_roots(&temp);
        let result = handle_transfer(
            &config,
            TransferArgs {
                source: FileLocator::new(Resource::Agave, "alice/a.txt"),
                destination: FileLocator::new(Resource::Dropbox, "up"),
                user: "alice".to_string(),
                max_retries: Some(0),
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_archive_is_gated_outside_production() {
        let temp = TempDir::new().unwrap();
        let config = config_with_roots(&temp);
        handle_archive(
            &config,
            ArchiveArgs {
                project_id: "PRJ-1".to_string(),
                project_uuid: "uuid-1".to_string(),
                paths: vec![],
                force: false,
            },
        )
        .await
        .unwrap();
        assert!(!temp.path().join("published").exists());
    }

    #[tokio::test]
    async fn test_forced_bundle_writes_the_zip() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("published/PRJ-2")).unwrap();
        std::fs::write(temp.path().join("published/PRJ-2/run.csv"), "1,2").unwrap();

        let config = config_with_roots(&temp);
        handle_bundle(
            &config,
            BundleArgs {
                project_id: "PRJ-2".to_string(),
                force: true,
            },
        )
        .await
        .unwrap();
        assert!(temp
            .path()
            .join("published/archives/PRJ-2_archive.zip")
            .is_file());
    }
}
