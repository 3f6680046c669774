//! API route definitions.

use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue, Method},
    routing::get,
};
use pulse_telemetry::masking::SensitiveDataMasker;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info_span, warn};

use crate::config::CorsConfig;
use crate::handlers::health;
use crate::state::AppState;
use crate::ws::ws_handler;

/// Creates the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config.cors);

    // WebSocket route carries its own narrower state.
    let ws_routes = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::clone(&state.ws));

    Router::new()
        .route("/api/v1/health", get(health::health_check))
        .merge(ws_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span with tokens masked out of the URI.
fn request_span(request: &Request) -> Span {
    let uri = request.uri().to_string();
    let uri = SensitiveDataMasker::new().mask_string(&uri).into_owned();
    info_span!("request", method = %request.method(), uri = %uri)
}

/// Builds the CORS layer from configuration.
fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        return CorsLayer::new();
    }

    let origins = if config.allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(%origin, error = %e, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|header| header.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(headers)
        .max_age(Duration::from_secs(config.max_age_secs))
}
