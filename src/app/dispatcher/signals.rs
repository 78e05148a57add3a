//! Stop requests from the operating system
//!
//! Ctrl+C or SIGTERM stops the pool from claiming new tasks; tasks already
//! running finish and record their outcome first.

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Forwards the first stop request to every subscriber of a channel
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<()>,
}

impl SignalHandler {
    pub fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    /// Spawn the watcher; abort the handle to stop watching
    pub fn setup(&self) -> JoinHandle<()> {
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            let source = stop_requested().await;
            info!("{} received, letting running tasks finish", source);
            if shutdown_tx.send(()).is_err() {
                warn!("Nothing was listening for the stop request");
            }
        })
    }
}

/// Resolves with the name of the first stop signal delivered
async fn stop_requested() -> &'static str {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot watch for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot watch for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}

/// Channel carrying a single stop request
pub fn create_shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    broadcast::channel(1)
}

/// Wait for a stop request; a closed channel counts as one
pub async fn wait_for_shutdown_signal(mut shutdown_rx: broadcast::Receiver<()>) {
    let _ = shutdown_rx.recv().await;
}
