//! # Pulse API
//!
//! Authenticated, per-user real-time activity notifications over WebSocket.
//!
//! This crate provides:
//! - A cache of RSA verification keys fetched from a remote JWKS endpoint
//! - Bearer token verification against those keys
//! - WebSocket admission gated on a verified token
//! - A hub that fans notifications out to every connection of a user
//! - A broadcaster that turns domain events into notifications
//!
//! # Routes
//!
//! - `/ws` - WebSocket endpoint, token via `?token=<jwt>` or `Authorization: Bearer <jwt>`
//! - `/api/v1/health` - Health check with live connection counts
//!
//! # Publishing
//!
//! Domain code holds an [`ActivityPublisher`] and never waits on delivery:
//!
//! ```no_run
//! # use pulse_api::{ActivityEvent, ActivityPublisher, EntityRef, EventKind};
//! # use pulse_api::auth::Identity;
//! fn on_signup(publisher: &dyn ActivityPublisher, owner: Identity) {
//!     publisher.publish(ActivityEvent::new(
//!         owner,
//!         EventKind::Signup,
//!         "waitlist",
//!         EntityRef::new("page-7", "Spring Launch"),
//!     ));
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

pub use config::{ApiConfig, CorsConfig, JwksConfig};
pub use error::ApiError;
pub use server::ApiServer;
pub use state::AppState;
pub use ws::{
    ActivityEvent, ActivityItem, ActivityPublisher, ActivityType, Broadcaster, EntityRef,
    EventKind, Hub, WsConfig, WsState,
};
