//! Turns domain events into notifications and hands them to the hub.
//!
//! Publishing is a side channel: it never fails and never blocks the caller
//! beyond a bounded enqueue per connection.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::hub::{DeliveryReport, Hub};
use super::message::{ActivityItem, ActivityType};
use crate::auth::Identity;

/// Maximum number of characters of a comment excerpt quoted in a message.
const EXCERPT_CHARS: usize = 80;

/// Domain event family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Page view, click or scroll signal
    Signal,
    /// Signup on an owned entity
    Signup,
    /// Comment or reply
    Comment,
    /// Reaction such as a like
    Reaction,
    /// Content report
    Report,
}

/// Reference to the entity an event happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    /// Entity id
    pub id: String,
    /// Display name
    pub name: String,
}

impl EntityRef {
    /// Creates an entity reference.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A domain event addressed to the owner of an entity.
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    /// User who receives the notification
    pub owner: Identity,
    /// Event family
    pub kind: EventKind,
    /// Family-specific sub-type, e.g. `click`, `reply`, `spam`
    pub sub_type: String,
    /// Entity the event happened on
    pub entity: EntityRef,
    /// Display name of whoever caused the event
    pub actor: Option<String>,
    /// Free text such as a comment excerpt
    pub detail: Option<String>,
    /// When the event happened; defaults to now
    pub timestamp: Option<DateTime<Utc>>,
    /// Link for the client to follow
    pub url: Option<String>,
}

impl ActivityEvent {
    /// Creates an event with no actor, detail, timestamp or URL.
    pub fn new(
        owner: Identity,
        kind: EventKind,
        sub_type: impl Into<String>,
        entity: EntityRef,
    ) -> Self {
        Self {
            owner,
            kind,
            sub_type: sub_type.into(),
            entity,
            actor: None,
            detail: None,
            timestamp: None,
            url: None,
        }
    }

    /// Sets the actor display name.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets the free-text detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Sets the event time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the reference URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Sink for activity events.
///
/// Domain code depends on this trait rather than on the hub.
pub trait ActivityPublisher: Send + Sync {
    /// Publishes `event` to its owner's live connections, best effort.
    fn publish(&self, event: ActivityEvent);
}

/// [`ActivityPublisher`] backed by a [`Hub`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    hub: Arc<Hub>,
}

impl Broadcaster {
    /// Creates a new broadcaster.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Formats and delivers `event`, returning the fan-out outcome.
    #[instrument(skip_all, fields(owner = %event.owner, kind = ?event.kind, sub_type = %event.sub_type))]
    pub fn deliver(&self, event: ActivityEvent) -> DeliveryReport {
        let item = format_event(&event);
        debug!(item_id = %item.id, "Publishing activity");
        self.hub.deliver_to_user(&event.owner, item)
    }

    /// A page view, click or scroll was recorded on `entity`.
    pub fn signal_recorded(
        &self,
        owner: &Identity,
        entity: EntityRef,
        signal: &str,
    ) -> DeliveryReport {
        self.deliver(ActivityEvent::new(
            owner.clone(),
            EventKind::Signal,
            signal,
            entity,
        ))
    }

    /// Someone signed up through `entity`.
    pub fn user_signed_up(
        &self,
        owner: &Identity,
        entity: EntityRef,
        source: &str,
    ) -> DeliveryReport {
        self.deliver(ActivityEvent::new(
            owner.clone(),
            EventKind::Signup,
            source,
            entity,
        ))
    }

    /// A comment or reply was posted on `entity`.
    pub fn comment_posted(
        &self,
        owner: &Identity,
        entity: EntityRef,
        author: Option<&str>,
        excerpt: Option<&str>,
        is_reply: bool,
    ) -> DeliveryReport {
        let sub_type = if is_reply { "reply" } else { "comment" };
        let mut event = ActivityEvent::new(owner.clone(), EventKind::Comment, sub_type, entity);
        event.actor = author.map(str::to_string);
        event.detail = excerpt.map(str::to_string);
        self.deliver(event)
    }

    /// A reaction was added to `entity`.
    pub fn reaction_added(
        &self,
        owner: &Identity,
        entity: EntityRef,
        reaction: &str,
        actor: Option<&str>,
    ) -> DeliveryReport {
        let mut event = ActivityEvent::new(owner.clone(), EventKind::Reaction, reaction, entity);
        event.actor = actor.map(str::to_string);
        self.deliver(event)
    }

    /// `entity` was reported for `reason`.
    pub fn content_reported(
        &self,
        owner: &Identity,
        entity: EntityRef,
        reason: &str,
    ) -> DeliveryReport {
        self.deliver(ActivityEvent::new(
            owner.clone(),
            EventKind::Report,
            reason,
            entity,
        ))
    }
}

impl ActivityPublisher for Broadcaster {
    fn publish(&self, event: ActivityEvent) {
        self.deliver(event);
    }
}

/// Builds the notification for `event`. Unknown sub-types fall back to a
/// generic message for the event's family.
#[must_use]
pub fn format_event(event: &ActivityEvent) -> ActivityItem {
    let name = event.entity.name.as_str();
    let who = event.actor.as_deref().unwrap_or("Someone");
    let sub_type = event.sub_type.trim().to_ascii_lowercase();

    let (kind, message) = match event.kind {
        EventKind::Signal => match sub_type.as_str() {
            "view" | "page_view" => (ActivityType::View, format!("{who} viewed {name}")),
            "click" => (ActivityType::Click, format!("{who} clicked on {name}")),
            "scroll" => (ActivityType::Scroll, format!("{who} scrolled through {name}")),
            _ => (ActivityType::Activity, format!("New activity on {name}")),
        },
        EventKind::Signup => {
            let message = match sub_type.as_str() {
                "waitlist" => format!("{who} joined the waitlist for {name}"),
                "newsletter" => format!("{who} subscribed to {name}"),
                "invite" => format!("{who} accepted an invite to {name}"),
                _ => format!("{who} signed up"),
            };
            (ActivityType::Signup, message)
        }
        EventKind::Comment => {
            let base = match sub_type.as_str() {
                "comment" => format!("{who} commented on {name}"),
                "reply" => format!("{who} replied to a comment on {name}"),
                _ => format!("New comment on {name}"),
            };
            let message = match event.detail.as_deref().map(str::trim) {
                Some(detail) if !detail.is_empty() => {
                    format!("{base}: \"{}\"", excerpt(detail))
                }
                _ => base,
            };
            (ActivityType::Comment, message)
        }
        EventKind::Reaction => {
            let message = match sub_type.as_str() {
                "like" => format!("{who} liked {name}"),
                "love" | "heart" => format!("{who} loved {name}"),
                "upvote" => format!("{who} upvoted {name}"),
                "" => format!("{who} reacted to {name}"),
                _ => format!("{who} reacted {} to {name}", event.sub_type.trim()),
            };
            (ActivityType::Reaction, message)
        }
        EventKind::Report => {
            let message = match sub_type.as_str() {
                "spam" => format!("{name} was reported as spam"),
                "abuse" | "harassment" => format!("{name} was reported for abuse"),
                "inappropriate" => format!("{name} was reported as inappropriate"),
                "copyright" => format!("{name} was reported for copyright infringement"),
                _ => format!("{name} was reported"),
            };
            (ActivityType::ContentReport, message)
        }
    };

    let mut item = ActivityItem::new(kind, event.entity.id.clone(), name, message);
    if let Some(timestamp) = event.timestamp {
        item = item.with_timestamp(timestamp);
    }
    if let Some(url) = &event.url {
        item = item.with_url(url.clone());
    }
    item
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}
