//! Application state for the API server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{HttpKeySetSource, KeyCache, KeySetError, KeySetSource, TokenVerifier};
use crate::config::ApiConfig;
use crate::ws::{ActivityPublisher, Broadcaster, Hub, WsState};

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// API configuration
    pub config: ApiConfig,
    /// WebSocket admission and delivery state
    pub ws: Arc<WsState>,
    /// Formats domain events for delivery
    broadcaster: Broadcaster,
    started_at: Instant,
}

impl AppState {
    /// Creates state that fetches keys from the configured JWKS URL.
    pub fn new(config: ApiConfig) -> Result<Self, KeySetError> {
        let source = HttpKeySetSource::new(config.jwks.url.clone(), config.jwks.fetch_timeout())?;
        Ok(Self::with_key_source(config, Arc::new(source)))
    }

    /// Creates state backed by an arbitrary key source.
    #[must_use]
    pub fn with_key_source(config: ApiConfig, source: Arc<dyn KeySetSource>) -> Self {
        let keys = Arc::new(KeyCache::new(source, config.jwks.cache_ttl()));
        let verifier = TokenVerifier::from_config(keys, &config.jwks);
        let ws = Arc::new(WsState::new(config.websocket.clone(), verifier));
        let broadcaster = Broadcaster::new(Arc::clone(&ws.hub));

        Self {
            config,
            ws,
            broadcaster,
            started_at: Instant::now(),
        }
    }

    /// Returns the connection hub.
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.ws.hub
    }

    /// Returns the broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Returns a publisher handle for domain collaborators.
    #[must_use]
    pub fn publisher(&self) -> Arc<dyn ActivityPublisher> {
        Arc::new(self.broadcaster.clone())
    }

    /// Returns the time since the state was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
