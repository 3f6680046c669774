//! Main server implementation.
//!
//! Wires configuration, logging, the API server and shutdown handling.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use pulse_api::{ActivityPublisher, ApiServer};
use pulse_telemetry::logging::init_logging;

use crate::config::{ConfigError, ServerConfig};
use crate::shutdown::{ShutdownController, setup_signal_handlers};

/// Top-level server process.
pub struct PulseServer {
    config: ServerConfig,
    api: ApiServer,
    shutdown: ShutdownController,
    _log_guards: Vec<WorkerGuard>,
}

impl std::fmt::Debug for PulseServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseServer")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl PulseServer {
    /// Builds the server. Logging is not initialized yet.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let api = ApiServer::new(config.api.clone())
            .map_err(|e| ServerError::Initialization(e.to_string()))?;

        Ok(Self {
            config,
            api,
            shutdown: ShutdownController::new(),
            _log_guards: Vec::new(),
        })
    }

    /// Loads and validates configuration from `path`.
    pub fn load_config(path: impl AsRef<Path>) -> Result<ServerConfig, ServerError> {
        Ok(ServerConfig::load(path)?)
    }

    /// Returns the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Returns a publisher that domain code can use to push activity.
    #[must_use]
    pub fn publisher(&self) -> Arc<dyn ActivityPublisher> {
        self.api.state().publisher()
    }

    /// Installs the global tracing subscriber.
    pub fn init_logging(&mut self) -> Result<(), ServerError> {
        let guards = init_logging(&self.config.logging).map_err(|e| {
            ServerError::Initialization(format!("Failed to initialize logging: {e}"))
        })?;

        self._log_guards = guards;
        info!(level = %self.config.logging.level, "Logging initialized");
        Ok(())
    }

    /// Binds the configured address and runs until a signal arrives.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.api.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Initialization(format!("Failed to bind to {addr}: {e}")))?;

        let signals = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers(signals).await {
                error!(error = %e, "Failed to install signal handlers");
            }
        });

        self.run_on(listener).await
    }

    /// Runs on an already bound listener until shutdown is initiated.
    ///
    /// Once shutdown starts, open connections get `shutdown.timeout_secs` to
    /// drain before the server stops waiting for them.
    pub async fn run_on(self, listener: TcpListener) -> Result<(), ServerError> {
        let Self {
            config,
            api,
            shutdown,
            _log_guards,
        } = self;

        info!(
            jwks_url = %config.api.jwks.url,
            queue_capacity = config.api.websocket.queue_capacity,
            "Pulse server starting"
        );

        let signal = {
            let shutdown = shutdown.clone();
            async move { shutdown.wait_for_shutdown().await }
        };
        let serve = api.serve(listener, signal);
        tokio::pin!(serve);

        let grace = config.shutdown.timeout();
        tokio::select! {
            result = &mut serve => {
                result.map_err(|e| ServerError::Runtime(e.to_string()))?;
            }
            () = async {
                shutdown.wait_for_shutdown().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(?grace, "Graceful shutdown timed out, abandoning open connections");
            }
        }

        shutdown.mark_complete();
        info!("Pulse server stopped");
        Ok(())
    }
}

/// Server error.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A component failed to start
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// The server failed while running
    #[error("Runtime error: {0}")]
    Runtime(String),
}
