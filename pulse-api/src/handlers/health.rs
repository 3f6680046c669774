//! Health check handler.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Registered WebSocket connections
    pub connections: usize,
    /// Users with at least one connection
    pub users: usize,
    /// Verification keys currently cached
    pub cached_keys: usize,
}

/// Health check handler.
///
/// GET /api/v1/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let hub = state.hub();
    let status = if hub.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime().as_secs(),
        connections: hub.connection_count(),
        users: hub.user_count(),
        cached_keys: state.ws.verifier.key_cache().key_ids().len(),
    })
}
