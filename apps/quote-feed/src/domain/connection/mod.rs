//! Stream Connection State Machine
//!
//! The streaming connector's lifecycle expressed as a pure transition
//! function over [`ConnectionState`] and [`ConnectionEvent`]. The connector
//! owns the only mutable copy of the state; everything else reads it.
//!
//! ```text
//!   Disconnected --start--> Connecting --open--> Connected --ack--> Subscribed
//!        ^                    |   ^                 |                   |
//!        |        handshake   |   | backoff         | handshake    closed /
//!      stop       failed      v   | elapsed         v failed       watchdog
//!   (any state)             Reconnecting <----------+-------------------+
//!                               |
//!                               | retries exhausted
//!                               v
//!                             Failed --start--> Connecting
//! ```

use serde::Serialize;

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not running.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, subscription not yet acknowledged.
    Connected,
    /// Receiving ticks.
    Subscribed,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Retries exhausted; terminal until started again.
    Failed,
}

/// Something that happened to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Explicit start request.
    Start,
    /// Socket handshake completed.
    SocketOpen,
    /// Subscription acknowledged (first data frame received).
    SubscriptionAck,
    /// Handshake or subscription failed or timed out.
    HandshakeFailed,
    /// Socket closed or errored unexpectedly.
    Closed,
    /// No tick arrived within the watchdog window.
    WatchdogTripped,
    /// Backoff delay elapsed.
    BackoffElapsed,
    /// Maximum retry count reached.
    RetriesExhausted,
    /// Explicit stop request.
    Stop,
}

impl ConnectionState {
    /// Apply an event. Returns `None` if the event is not legal in this state.
    #[must_use]
    pub const fn next(self, event: ConnectionEvent) -> Option<Self> {
        use ConnectionEvent as E;
        match (self, event) {
            (_, E::Stop) => Some(Self::Disconnected),
            (Self::Disconnected | Self::Failed, E::Start) => Some(Self::Connecting),
            (Self::Connecting, E::SocketOpen) => Some(Self::Connected),
            (Self::Connected, E::SubscriptionAck) => Some(Self::Subscribed),
            (Self::Connecting | Self::Connected, E::HandshakeFailed | E::Closed)
            | (Self::Subscribed, E::Closed | E::WatchdogTripped) => Some(Self::Reconnecting),
            (Self::Reconnecting, E::BackoffElapsed) => Some(Self::Connecting),
            (Self::Reconnecting, E::RetriesExhausted) => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether `event` is legal in this state.
    #[must_use]
    pub const fn accepts(self, event: ConnectionEvent) -> bool {
        self.next(event).is_some()
    }

    /// Only a subscribed stream is authoritative for freshness.
    #[must_use]
    pub const fn is_subscribed(self) -> bool {
        matches!(self, Self::Subscribed)
    }

    /// Whether the connector task is (or should be) running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Label for logs and the status endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Stable ordinal for the state gauge.
    #[must_use]
    pub const fn ordinal(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Subscribed => 3,
            Self::Reconnecting => 4,
            Self::Failed => 5,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
