//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteProviderPort`: one direct quote call to the upstream broker
//! - `StreamControlPort`: lifecycle and health of the streaming connector
//!
//! ## Errors
//!
//! The error taxonomy shared by every acquisition path lives here so that
//! adapters and services agree on what a failure means.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::connection::ConnectionState;
use crate::domain::instrument::InstrumentKey;
use crate::domain::quote::{Quote, QuoteSource};

// =============================================================================
// Upstream Quote
// =============================================================================

/// Quote fields as returned by an upstream call, before the local receipt
/// time and source tag are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamQuote {
    /// Last traded price.
    pub last_price: Decimal,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Day volume.
    pub volume: Option<u64>,
    /// Open interest.
    pub open_interest: Option<u64>,
    /// Exchange timestamp.
    pub exchange_time: Option<DateTime<Utc>>,
}

impl UpstreamQuote {
    /// Quote with only a last price.
    #[must_use]
    pub const fn last_price(last_price: Decimal) -> Self {
        Self {
            last_price,
            bid: None,
            ask: None,
            volume: None,
            open_interest: None,
            exchange_time: None,
        }
    }

    /// Attach key, receipt time and source.
    #[must_use]
    pub fn into_quote(
        self,
        key: InstrumentKey,
        observed_at: DateTime<Utc>,
        source: QuoteSource,
    ) -> Quote {
        Quote {
            key,
            last_price: self.last_price,
            bid: self.bid,
            ask: self.ask,
            volume: self.volume,
            open_interest: self.open_interest,
            observed_at,
            exchange_time: self.exchange_time,
            source,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Streaming connection failures. Each one drives the connector into
/// `Reconnecting`; none is surfaced to readers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Socket handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Upstream refused the credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// Read or write on an open socket failed.
    #[error("socket error: {0}")]
    Socket(String),
    /// Connect plus subscribe did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    /// Upstream sent something unparsable or unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Socket closed by the peer.
    #[error("connection closed by upstream")]
    Closed,
    /// Socket open but no data tick within the watchdog window.
    #[error("no tick received for {0:?}")]
    TickTimeout(Duration),
}

/// Per-key (or per-batch) fetch failures.
///
/// `Clone` so a single in-flight result can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The upstream call exceeded its deadline.
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),
    /// Upstream says the instrument is invalid. Not retried.
    #[error("upstream rejected instrument: {0}")]
    UpstreamRejected(String),
    /// Could not reach or authenticate with the upstream.
    #[error("upstream unreachable: {0}")]
    Connection(String),
    /// Upstream returned an error (rate limit, server error, bad payload).
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The whole refill deadline elapsed before any worker returned.
    #[error("refill deadline of {0:?} elapsed before any result")]
    BatchTimeout(Duration),
    /// The fetcher is shutting down.
    #[error("refill cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the key should be excluded from later refills.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::UpstreamRejected(_))
    }

    /// Whether this is a deadline failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::BatchTimeout(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::UpstreamRejected(_) => "rejected",
            Self::Connection(_) => "connection",
            Self::Upstream(_) => "upstream",
            Self::BatchTimeout(_) => "batch_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Read failures surfaced to callers of `get_quotes`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    /// No cache entry, the refill failed, and no synthetic quote could be
    /// produced.
    #[error("no data available for {key}: {reason}")]
    NoDataAvailable {
        /// The key that could not be served.
        key: InstrumentKey,
        /// Why the last fallback failed.
        reason: String,
    },
}

// =============================================================================
// Ports
// =============================================================================

/// One direct quote call against the upstream broker.
#[async_trait]
pub trait QuoteProviderPort: Send + Sync {
    /// Fetch the current quote for a single instrument.
    async fn fetch_quote(&self, key: &InstrumentKey) -> Result<UpstreamQuote, FetchError>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Lifecycle control and health of the streaming connector.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamControlPort: Send + Sync {
    /// Current connection state.
    fn health(&self) -> ConnectionState;

    /// Start the connector. No-op if already running; restarts from
    /// `Failed` with a fresh retry budget.
    fn start(&self);

    /// Stop the connector and wait (bounded) for its task to exit.
    async fn stop(&self);
}
