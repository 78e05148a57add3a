//! DesignSafe task layer
//!
//! Asynchronous tasks behind a research-data portal: cross-backend file
//! transfers, search index synchronization, project maintenance, and the
//! multi-stage publication pipeline, dispatched from named queues with
//! per-task retry policies and user notifications.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

pub use errors::{AppError, Result};
