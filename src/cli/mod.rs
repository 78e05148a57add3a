//! Command-line interface components
//!
//! Argument parsing and the handlers behind each subcommand.

pub mod args;
pub mod commands;

pub use args::{
    ArchiveArgs, BundleArgs, Cli, Commands, ConfigAction, ConfigArgs, CopyPublicArgs, GlobalArgs, MirrorArgs,
    TransferArgs,
};
pub use commands::{
    handle_archive, handle_bundle, handle_config, handle_copy_public, handle_mirror, handle_transfer,
};
