//! Connection registry and per-user fan-out.
//!
//! The hub keeps two indexes over live connections:
//! - every registered connection, keyed by [`ConnectionId`]
//! - each user's set of connections, keyed by [`Identity`]
//!
//! Both are sharded `DashMap`s, so traffic for unrelated users never contends
//! on a single lock. No hub operation awaits: delivery is a `try_send` onto
//! each connection's bounded queue, and a full queue drops the notification
//! for that connection only.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::config::{OverflowPolicy, WsConfig};
use super::message::ActivityItem;
use crate::auth::Identity;

/// Receiving half of a connection's outbound queue.
pub type Outbound = mpsc::Receiver<Arc<ActivityItem>>;

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the inner ID value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionPhase {
    /// Token verified, not yet visible to delivery
    Admitted = 0,
    /// Reachable through [`Hub::deliver_to_user`]
    Registered = 1,
    /// Removed from the hub, pumps winding down
    Unregistering = 2,
    /// Queue closed and both pumps exited
    Closed = 3,
}

impl ConnectionPhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Admitted,
            1 => Self::Registered,
            2 => Self::Unregistering,
            _ => Self::Closed,
        }
    }
}

/// Hub-side handle of a single connection.
///
/// Holds the sending half of the outbound queue. Closing the handle drops the
/// sender, so the writer pump sees the queue end once it has drained it.
#[derive(Debug)]
pub struct ClientHandle {
    id: ConnectionId,
    identity: Identity,
    sender: Mutex<Option<mpsc::Sender<Arc<ActivityItem>>>>,
    cancel: CancellationToken,
    phase: AtomicU8,
    connected_at: Instant,
}

impl ClientHandle {
    /// Returns the connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the identity the connection was admitted with.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        ConnectionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Token cancelled when the connection must stop.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns how long the connection has been open.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Returns true once the outbound queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Records that both pumps have exited.
    pub fn mark_closed(&self) {
        self.phase
            .store(ConnectionPhase::Closed as u8, Ordering::Release);
    }

    fn advance(&self, from: ConnectionPhase, to: ConnectionPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_enqueue(
        &self,
        item: Arc<ActivityItem>,
    ) -> Result<(), TrySendError<Arc<ActivityItem>>> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(item),
            None => Err(TrySendError::Closed(item)),
        }
    }

    /// Closes the outbound queue and cancels the pumps. Safe to call repeatedly.
    fn close(&self) {
        drop(self.sender.lock().take());
        self.cancel.cancel();
    }
}

/// Outcome of a single [`Hub::deliver_to_user`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the notification was queued on
    pub delivered: usize,
    /// Connections that were skipped because their queue was full or closed
    pub dropped: usize,
}

/// Registry of live connections, indexed globally and per user.
#[derive(Debug)]
pub struct Hub {
    connections: DashMap<ConnectionId, Arc<ClientHandle>>,
    users: DashMap<Identity, HashMap<ConnectionId, Arc<ClientHandle>>>,
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
    shutdown: CancellationToken,
}

impl Hub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new(config: &WsConfig) -> Self {
        Self {
            connections: DashMap::new(),
            users: DashMap::new(),
            queue_capacity: config.queue_capacity.max(1),
            overflow_policy: config.overflow_policy,
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds a connection for `identity` with its own bounded queue.
    ///
    /// The connection is not reachable until passed to [`Hub::register`].
    pub fn connect(&self, identity: Identity) -> (Arc<ClientHandle>, Outbound) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let handle = Arc::new(ClientHandle {
            id: ConnectionId::generate(),
            identity,
            sender: Mutex::new(Some(tx)),
            cancel: self.shutdown.child_token(),
            phase: AtomicU8::new(ConnectionPhase::Admitted as u8),
            connected_at: Instant::now(),
        });
        (handle, rx)
    }

    /// Makes `client` reachable through its identity.
    ///
    /// Returns false, and closes the client, if the hub is shutting down or the
    /// client was already registered once.
    pub fn register(&self, client: &Arc<ClientHandle>) -> bool {
        if self.shutdown.is_cancelled() {
            debug!(conn_id = %client.id, "Hub is shutting down, refusing registration");
            client.close();
            return false;
        }
        if !client.advance(ConnectionPhase::Admitted, ConnectionPhase::Registered) {
            debug!(conn_id = %client.id, phase = ?client.phase(), "Connection not in admitted phase");
            return false;
        }

        self.users
            .entry(client.identity.clone())
            .or_default()
            .insert(client.id, Arc::clone(client));
        self.connections.insert(client.id, Arc::clone(client));

        info!(
            conn_id = %client.id,
            user = %client.identity,
            connections = self.connections.len(),
            "Connection registered"
        );
        true
    }

    /// Removes a connection and closes its queue.
    ///
    /// Returns true only for the call that actually removed it; later calls
    /// for the same id are no-ops.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let Some((_, client)) = self.connections.remove(&id) else {
            trace!(conn_id = %id, "Connection already unregistered");
            return false;
        };

        client.advance(ConnectionPhase::Registered, ConnectionPhase::Unregistering);
        client.close();

        if let Some(mut set) = self.users.get_mut(&client.identity) {
            set.remove(&id);
        }
        self.users.remove_if(&client.identity, |_, set| set.is_empty());

        info!(
            conn_id = %id,
            user = %client.identity,
            open_for_ms = u64::try_from(client.age().as_millis()).unwrap_or(u64::MAX),
            "Connection unregistered"
        );
        true
    }

    /// Queues `item` on every connection of `identity` without waiting.
    ///
    /// A full queue drops the item for that connection only. A user with no
    /// connections is not an error.
    pub fn deliver_to_user(&self, identity: &Identity, item: ActivityItem) -> DeliveryReport {
        let targets: Vec<Arc<ClientHandle>> = match self.users.get(identity) {
            Some(set) => set.values().cloned().collect(),
            None => {
                trace!(user = %identity, "No live connections for user");
                return DeliveryReport::default();
            }
        };

        let item = Arc::new(item);
        let mut report = DeliveryReport::default();

        for client in targets {
            match client.try_enqueue(Arc::clone(&item)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        conn_id = %client.id,
                        user = %identity,
                        item_id = %item.id,
                        policy = ?self.overflow_policy,
                        "Outbound queue full, dropping notification"
                    );
                    if self.overflow_policy == OverflowPolicy::Disconnect {
                        self.unregister(client.id);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    report.dropped += 1;
                    debug!(conn_id = %client.id, "Outbound queue closed, skipping");
                }
            }
        }

        debug!(
            user = %identity,
            delivered = report.delivered,
            dropped = report.dropped,
            "Notification fanned out"
        );
        report
    }

    /// Cancels every connection and empties the registry.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        let removed = ids.into_iter().filter(|id| self.unregister(*id)).count();

        info!(removed, "Hub shut down");
    }

    /// Returns true once [`Hub::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns the number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the number of users with at least one connection.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Returns the number of connections registered for `identity`.
    #[must_use]
    pub fn user_connection_count(&self, identity: &Identity) -> usize {
        self.users.get(identity).map_or(0, |set| set.len())
    }
}
