//! Graceful shutdown handling.
//!
//! Provides shutdown coordination for the server, including signal handling.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown controller for coordinating graceful shutdown.
///
/// Cloning is cheap; every clone observes the same state.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    /// Flips to true once shutdown has been initiated.
    initiated_tx: Arc<watch::Sender<bool>>,
    /// Flips to true once shutdown has finished.
    completion_tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    /// Creates a new shutdown controller.
    #[must_use]
    pub fn new() -> Self {
        let (initiated_tx, _) = watch::channel(false);
        let (completion_tx, _) = watch::channel(false);

        Self {
            initiated_tx: Arc::new(initiated_tx),
            completion_tx: Arc::new(completion_tx),
        }
    }

    /// Initiates shutdown. Later calls are no-ops.
    pub fn initiate_shutdown(&self) {
        let first = self.initiated_tx.send_if_modified(|initiated| {
            let changed = !*initiated;
            *initiated = true;
            changed
        });
        if first {
            info!("Shutdown initiated");
        }
    }

    /// Returns whether shutdown has been initiated.
    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        *self.initiated_tx.borrow()
    }

    /// Completes once shutdown is initiated, including if it already was.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.initiated_tx.subscribe();
        let _ = rx.wait_for(|initiated| *initiated).await;
    }

    /// Marks shutdown as complete.
    pub fn mark_complete(&self) {
        self.completion_tx.send_replace(true);
    }

    /// Waits for shutdown to complete with a timeout.
    ///
    /// Returns `true` if shutdown completed, `false` if the timeout elapsed.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let mut rx = self.completion_tx.subscribe();

        if let Ok(result) = tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await {
            result.is_ok()
        } else {
            warn!(?timeout, "Shutdown completion timeout");
            false
        }
    }
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM and initiates shutdown.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn setup_signal_handlers(controller: ShutdownController) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT (Ctrl+C)");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            () = controller.wait_for_shutdown() => return Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
            }
            () = controller.wait_for_shutdown() => return Ok(()),
        }
    }

    controller.initiate_shutdown();
    Ok(())
}
