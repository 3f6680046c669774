//! Notification payloads pushed to clients.
//!
//! Every frame the server sends is a JSON-encoded [`ActivityItem`]:
//!
//! ```json
//! {
//!   "id": "5f0c...",
//!   "type": "signup",
//!   "entity_id": "campaign-7",
//!   "entity_name": "Spring Launch",
//!   "message": "Someone signed up",
//!   "timestamp": "2026-04-01T12:00:00Z",
//!   "url": "https://example.com/c/7"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category tag of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// Page view
    View,
    /// Click on a tracked element
    Click,
    /// Scroll depth signal
    Scroll,
    /// New signup
    Signup,
    /// New comment or reply
    Comment,
    /// Reaction on an entity
    Reaction,
    /// Content flagged by a reader
    ContentReport,
    /// Anything without a more specific tag
    Activity,
}

/// A single notification. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityItem {
    /// Unique notification id
    pub id: Uuid,
    /// Category tag
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// Id of the owning entity
    pub entity_id: String,
    /// Display name of the owning entity
    pub entity_name: String,
    /// Human-readable message
    pub message: String,
    /// When the underlying event happened
    pub timestamp: DateTime<Utc>,
    /// Optional link for the client to follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ActivityItem {
    /// Creates a notification stamped with a fresh id and the current time.
    pub fn new(
        kind: ActivityType,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
            url: None,
        }
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attaches a reference URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Encodes the notification as a JSON text payload.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
