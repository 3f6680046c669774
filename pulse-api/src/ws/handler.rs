//! WebSocket admission.
//!
//! A connection is upgraded only after its token verifies. The token is read
//! from the `token` query parameter, falling back to an
//! `Authorization: Bearer` header. Any failure is answered with a plain
//! HTTP 401 and no upgrade takes place.

use axum::{
    extract::{
        Query, State,
        rejection::QueryRejection,
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use pulse_telemetry::masking::Sensitive;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::{self, PumpSettings};
use super::state::WsState;
use crate::auth::{Identity, extract_bearer_token};
use crate::error::ApiError;

/// Query parameters for WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<Arc<WsState>>,
    query: Result<Query<WsQuery>, QueryRejection>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            debug!(%rejection, "WebSocket request with unreadable query");
            return ApiError::Unauthorized("malformed token parameter".to_string())
                .into_response();
        }
    };

    let Some(token) = locate_token(query.token, &headers) else {
        debug!("WebSocket request without token");
        return ApiError::Unauthorized("missing token".to_string()).into_response();
    };

    let identity = match state.verifier.verify(token.expose()).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(reason = e.reason(), error = %e, token = %token, "WebSocket admission rejected");
            return ApiError::from(e).into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(user = %identity, %rejection, "Verified request is not a WebSocket upgrade");
            return rejection.into_response();
        }
    };

    info!(user = %identity, "WebSocket admitted");
    upgrade
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, identity, state))
}

/// Registers the upgraded socket and runs its pumps.
async fn handle_socket(socket: WebSocket, identity: Identity, state: Arc<WsState>) {
    let hub = Arc::clone(&state.hub);
    let (client, outbound) = hub.connect(identity);

    if !hub.register(&client) {
        debug!(conn_id = %client.id(), "Registration refused, closing socket");
        drop(socket);
        return;
    }

    client::serve(
        socket,
        client,
        outbound,
        hub,
        PumpSettings::from(&state.config),
    )
    .await;
}

fn locate_token(query_token: Option<String>, headers: &HeaderMap) -> Option<Sensitive<String>> {
    query_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(extract_bearer_token)
                .map(str::to_string)
        })
        .map(Sensitive::new)
}
