//! Quote Types
//!
//! Immutable quote values and the source tag that records which acquisition
//! path produced them. A new quote replaces the cache entry for its key; it
//! is never mutated in place.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::instrument::InstrumentKey;

// =============================================================================
// Quote Source
// =============================================================================

/// Acquisition path that produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    /// Pushed by the streaming connection.
    Stream,
    /// Fetched by the background poll cycle.
    Poll,
    /// Fetched on demand by a read.
    Direct,
    /// Generated because no real source could serve the key.
    Synthetic,
}

impl QuoteSource {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Poll => "poll",
            Self::Direct => "direct",
            Self::Synthetic => "synthetic",
        }
    }

    /// Position in the fallback chain; lower is preferred.
    #[must_use]
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::Stream => 0,
            Self::Poll => 1,
            Self::Direct => 2,
            Self::Synthetic => 3,
        }
    }

    /// Whether the quote was observed from a real upstream.
    #[must_use]
    pub const fn is_real(&self) -> bool {
        !matches!(self, Self::Synthetic)
    }
}

impl std::fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Quote
// =============================================================================

/// A point-in-time quote for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Instrument.
    pub key: InstrumentKey,
    /// Last traded price.
    pub last_price: Decimal,
    /// Best bid, when the source carries depth.
    pub bid: Option<Decimal>,
    /// Best ask, when the source carries depth.
    pub ask: Option<Decimal>,
    /// Traded volume for the day.
    pub volume: Option<u64>,
    /// Open interest (derivatives only).
    pub open_interest: Option<u64>,
    /// Local receipt time; TTL is measured from here.
    pub observed_at: DateTime<Utc>,
    /// Exchange timestamp, if the upstream supplied one.
    pub exchange_time: Option<DateTime<Utc>>,
    /// Acquisition path.
    pub source: QuoteSource,
}

impl Quote {
    /// Minimal quote carrying only a last price.
    #[must_use]
    pub const fn last_price_only(
        key: InstrumentKey,
        last_price: Decimal,
        observed_at: DateTime<Utc>,
        source: QuoteSource,
    ) -> Self {
        Self {
            key,
            last_price,
            bid: None,
            ask: None,
            volume: None,
            open_interest: None,
            observed_at,
            exchange_time: None,
            source,
        }
    }

    /// Mid price when both sides are present, else the last price.
    #[must_use]
    pub fn mid_or_last(&self) -> Decimal {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > Decimal::ZERO && ask > Decimal::ZERO => {
                (bid + ask) / Decimal::TWO
            }
            _ => self.last_price,
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached quote with its expiry.
///
/// `expires_at` is always `quote.observed_at + ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    quote: Quote,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Wrap a quote with the cache TTL.
    #[must_use]
    pub fn new(quote: Quote, ttl: Duration) -> Self {
        let expires_at = quote.observed_at + ttl;
        Self { quote, expires_at }
    }

    /// The cached quote.
    #[must_use]
    pub const fn quote(&self) -> &Quote {
        &self.quote
    }

    /// Expiry timestamp.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Fresh while `now < expires_at`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
