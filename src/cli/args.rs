//! Command-line argument parsing
//!
//! Exposes the operator-facing subset of the task layer: transfers between
//! configured storage roots, the archive copy, the preservation mirror, and
//! configuration management. Tasks that need the search index or the
//! publication records only run inside the deployed workers.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::models::FileLocator;

/// DesignSafe task layer
#[derive(Parser, Debug)]
#[command(
    name = "designsafe_tasks",
    version,
    about = "Run DesignSafe data transfer and publication tasks",
    long_about = "Operator tool for the DesignSafe asynchronous task layer.
Copies trees between storage backends with per-task retry, builds the read-only publication archive,
and mirrors archived projects into the preservation repository."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy a file or folder between two resources
    Transfer(TransferArgs),

    /// Copy from the public data depot into a user's private storage
    CopyPublic(CopyPublicArgs),

    /// Copy a project's files into the read-only publication archive
    Archive(ArchiveArgs),

    /// Mirror an archived project into the preservation repository
    Mirror(MirrorArgs),

    /// Zip an archived project into its downloadable bundle
    Bundle(BundleArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Source locator, e.g. "agave:alice/data"
    pub source: FileLocator,

    /// Destination folder locator, e.g. "dropbox:backups"
    pub destination: FileLocator,

    /// User the transfer runs for
    #[arg(short, long)]
    pub user: String,

    /// Retries allowed after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct CopyPublicArgs {
    /// Path in the public data depot
    pub source_path: String,

    /// Destination folder in the user's private storage
    pub destination_path: String,

    /// User the copy runs for
    #[arg(short, long)]
    pub user: String,
}

#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// Published project id, e.g. "PRJ-1234"
    pub project_id: String,

    /// Project uuid naming the project's storage directory
    pub project_uuid: String,

    /// Paths relative to the project directory; all top-level entries when omitted
    #[arg(short, long = "path", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Run even when the configured environment is not production
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Published project id to mirror
    pub project_id: String,

    /// Run even when the configured environment is not production
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BundleArgs {
    /// Published project id to bundle
    pub project_id: String,

    /// Run even when the configured environment is not production
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a commented default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level from the global flags
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }

    /// Whether any verbosity flag was given
    pub fn has_verbosity_flag(&self) -> bool {
        self.global.quiet || self.global.verbose || self.global.very_verbose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::Resource;

    #[test]
    fn test_transfer_parsing() {
        let cli = Cli::try_parse_from([
            "designsafe_tasks",
            "transfer",
            "agave:alice/data",
            "dropbox:backups",
            "--user",
            "alice",
            "--max-retries",
            "1",
        ])
        .unwrap();

        match cli.command {
            Commands::Transfer(args) => {
                assert_eq!(args.source, FileLocator::new(Resource::Agave, "alice/data"));
                assert_eq!(args.destination.resource, Resource::Dropbox);
                assert_eq!(args.max_retries, Some(1));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_invalid_locator_is_rejected() {
        let result = Cli::try_parse_from([
            "designsafe_tasks",
            "transfer",
            "nowhere:x",
            "agave:alice",
            "--user",
            "alice",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_archive_paths_and_global_flags() {
        let cli = Cli::try_parse_from([
            "designsafe_tasks",
            "archive",
            "PRJ-1",
            "uuid-1",
            "--path",
            "a.txt",
            "--path",
            "b/c.txt",
            "--very-verbose",
        ])
        .unwrap();

        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
        match cli.command {
            Commands::Archive(args) => {
                assert_eq!(args.paths, vec!["a.txt", "b/c.txt"]);
                assert!(!args.force);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bundle_command() {
        let cli = Cli::try_parse_from(["designsafe_tasks", "bundle", "PRJ-7", "--force"]).unwrap();
        match cli.command {
            Commands::Bundle(args) => {
                assert_eq!(args.project_id, "PRJ-7");
                assert!(args.force);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_log_level() {
        let quiet = Cli::try_parse_from(["designsafe_tasks", "-q", "config", "show"]).unwrap();
        let plain = Cli::try_parse_from(["designsafe_tasks", "config", "show"]).unwrap();
        assert_eq!(quiet.log_level(), tracing::Level::ERROR);
        assert_eq!(plain.log_level(), tracing::Level::WARN);
        assert!(!plain.has_verbosity_flag());
    }
}
