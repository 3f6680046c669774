//! WebSocket delivery of per-user activity notifications.
//!
//! # Architecture
//!
//! ```text
//!  domain code ──► Broadcaster ──► Hub::deliver_to_user
//!                                      │ try_send per connection
//!                        ┌─────────────┼─────────────┐
//!                        ▼             ▼             ▼
//!                   queue (256)   queue (256)   queue (256)
//!                        │             │             │
//!                   write pump    write pump    write pump ──► socket
//!                   read pump     read pump     read pump  ◄── socket
//! ```
//!
//! Admission happens before the upgrade: `GET /ws?token=<jwt>` (or an
//! `Authorization: Bearer` header) is verified first, and only a verified
//! request is upgraded and registered under the token's subject.
//!
//! The stream is one-way. Clients receive JSON [`ActivityItem`] text frames
//! and anything they send other than control frames is ignored.
//!
//! # Example Client Usage
//!
//! ```javascript
//! const ws = new WebSocket('wss://host/ws?token=<jwt>');
//! ws.onmessage = (event) => {
//!     const item = JSON.parse(event.data);
//!     console.log(item.type, item.message);
//! };
//! ```

pub mod broadcaster;
pub mod client;
pub mod config;
pub mod handler;
pub mod hub;
pub mod message;
pub mod state;

pub use broadcaster::{ActivityEvent, ActivityPublisher, Broadcaster, EntityRef, EventKind};
pub use config::{OverflowPolicy, WsConfig};
pub use handler::ws_handler;
pub use hub::{ClientHandle, ConnectionId, ConnectionPhase, DeliveryReport, Hub};
pub use message::{ActivityItem, ActivityType};
pub use state::WsState;
