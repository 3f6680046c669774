//! API server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::KeySetSource;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::routes::create_router;
use crate::state::AppState;

/// API server.
#[derive(Debug)]
pub struct ApiServer {
    /// Server configuration
    config: ApiConfig,
    /// Application state
    state: Arc<AppState>,
}

impl ApiServer {
    /// Creates a server that fetches keys from the configured JWKS URL.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let state = AppState::new(config.clone())
            .map_err(|e| ApiError::Internal(format!("Failed to build key set client: {e}")))?;
        Ok(Self::with_state(config, Arc::new(state)))
    }

    /// Creates a server backed by an arbitrary key source.
    #[must_use]
    pub fn with_key_source(config: ApiConfig, source: Arc<dyn KeySetSource>) -> Self {
        let state = Arc::new(AppState::with_key_source(config.clone(), source));
        Self::with_state(config, state)
    }

    /// Creates a new API server with custom state.
    #[must_use]
    pub fn with_state(config: ApiConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Returns a reference to the application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Binds the configured address and serves until `shutdown_signal` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or run.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ApiError> {
        let addr = self.config.bind_address();

        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| ApiError::Internal(format!("Invalid bind address: {e}")))?;

        let listener = TcpListener::bind(socket_addr)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to bind to {addr}: {e}")))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serves on an already bound listener until `shutdown_signal` fires.
    ///
    /// When the signal fires every WebSocket connection is closed, so the
    /// graceful drain does not wait on long-lived sockets.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while running.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ApiError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ApiError::Internal(format!("Listener has no address: {e}")))?;
        info!(addr = %local_addr, "API server listening");

        let hub = Arc::clone(self.state.hub());
        let app = create_router(Arc::clone(&self.state));

        let signal = {
            let hub = Arc::clone(&hub);
            async move {
                shutdown_signal.await;
                info!("Shutdown signal received, closing WebSocket connections");
                hub.shutdown();
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ApiError::Internal(format!("Server error: {e}")))?;

        if !hub.is_shutting_down() {
            hub.shutdown();
        }
        warn!("API server shut down");

        Ok(())
    }
}
