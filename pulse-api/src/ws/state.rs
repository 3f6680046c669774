//! WebSocket server state.

use std::sync::Arc;

use super::config::WsConfig;
use super::hub::Hub;
use crate::auth::TokenVerifier;

/// Shared WebSocket server state.
#[derive(Debug)]
pub struct WsState {
    /// WebSocket configuration
    pub config: WsConfig,
    /// Verifies the token presented at handshake
    pub verifier: TokenVerifier,
    /// Connection registry
    pub hub: Arc<Hub>,
}

impl WsState {
    /// Creates a new WebSocket state with an empty hub.
    #[must_use]
    pub fn new(config: WsConfig, verifier: TokenVerifier) -> Self {
        let hub = Arc::new(Hub::new(&config));
        Self {
            config,
            verifier,
            hub,
        }
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }
}
