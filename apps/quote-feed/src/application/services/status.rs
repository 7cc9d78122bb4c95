//! Source Status
//!
//! Records which acquisition path most recently served data and when the
//! background poll last ran. Written only by the orchestrator; read by the
//! HTTP surface. Purely observational.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::connection::ConnectionState;
use crate::domain::quote::QuoteSource;

/// Snapshot returned by `source_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    /// Source of the most recent read, if any read has happened.
    pub active_source: Option<QuoteSource>,
    /// When that read was served.
    pub last_served_at: Option<DateTime<Utc>>,
    /// Live connector state.
    pub connector_state: ConnectionState,
    /// When the background poll last issued a refill.
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Whether the background poller is running.
    pub polling_active: bool,
    /// Poll period in seconds.
    pub poll_interval_secs: u64,
}

#[derive(Debug, Default)]
struct Recorded {
    active_source: Option<QuoteSource>,
    last_served_at: Option<DateTime<Utc>>,
    last_poll_at: Option<DateTime<Utc>>,
}

/// Single-writer, multi-reader status record.
#[derive(Debug, Default)]
pub struct SourceStatusTracker {
    recorded: RwLock<Recorded>,
}

impl SourceStatusTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the overall source of a completed read.
    pub fn record_served(&self, source: QuoteSource, at: DateTime<Utc>) {
        let mut recorded = self.recorded.write();
        recorded.active_source = Some(source);
        recorded.last_served_at = Some(at);
    }

    /// Record a completed poll cycle.
    pub fn record_poll(&self, at: DateTime<Utc>) {
        self.recorded.write().last_poll_at = Some(at);
    }

    /// Time of the last poll cycle.
    #[must_use]
    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        self.recorded.read().last_poll_at
    }

    /// Combine the recorded fields with live connector and poller state.
    #[must_use]
    pub fn snapshot(
        &self,
        connector_state: ConnectionState,
        polling_active: bool,
        poll_interval_secs: u64,
    ) -> SourceStatus {
        let recorded = self.recorded.read();
        SourceStatus {
            active_source: recorded.active_source,
            last_served_at: recorded.last_served_at,
            connector_state,
            last_poll_at: recorded.last_poll_at,
            polling_active,
            poll_interval_secs,
        }
    }
}
