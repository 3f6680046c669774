//! WebSocket server configuration.
//!
//! This module provides configuration for per-connection behaviour:
//! - Outbound queue capacity and overflow policy
//! - Heartbeat interval and idle timeout
//! - Write timeout and inbound frame size limit

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the hub does with a connection whose outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the notification for that connection only
    #[default]
    Drop,
    /// Drop the notification and unregister the connection
    Disconnect,
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Maximum number of queued notifications per connection
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval between server pings in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Idle time in seconds after which a silent peer is dropped
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Upper bound on a single transport write in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Behaviour when a connection's queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            connection_timeout_secs: default_connection_timeout(),
            write_timeout_secs: default_write_timeout(),
            max_message_size: default_max_message_size(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl WsConfig {
    /// Returns the heartbeat interval as a Duration, at least one second.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Returns the idle timeout as a Duration, at least one second.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs.max(1))
    }

    /// Returns the write timeout as a Duration, at least one second.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    90
}

fn default_write_timeout() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    64 * 1024
}
