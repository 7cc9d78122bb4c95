//! Kite Connect Wire Types
//!
//! Serde types for the Kite REST quote endpoint and the ticker's JSON
//! control messages. Binary tick frames are handled by the codec.
//!
//! # REST
//!
//! `GET /quote?i=NSE:SBIN` returns
//!
//! ```json
//! {"status":"success","data":{"NSE:SBIN":{"instrument_token":779521,
//!   "timestamp":"2025-01-10 10:15:02","last_price":752.4,"volume":1234,
//!   "oi":0,"depth":{"buy":[{"price":752.3,"quantity":10,"orders":2}],
//!   "sell":[{"price":752.5,"quantity":7,"orders":1}]}}}}
//! ```
//!
//! and on failure
//!
//! ```json
//! {"status":"error","message":"Invalid instrument","error_type":"InputException"}
//! ```
//!
//! # Ticker
//!
//! Requests are `{"a": action, "v": value}`. Text frames from the server are
//! `{"type": kind, "data": payload}`.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::UpstreamQuote;

/// Exchange timestamps are IST wall-clock time.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

// =============================================================================
// REST
// =============================================================================

/// Envelope of every REST response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// `success` or `error`.
    pub status: String,
    /// Payload on success.
    #[serde(default)]
    pub data: Option<T>,
    /// Error text on failure.
    #[serde(default)]
    pub message: Option<String>,
    /// Exception class on failure, e.g. `InputException`.
    #[serde(default)]
    pub error_type: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Whether the call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// `GET /quote` payload, keyed by `EXCHANGE:SYMBOL`.
pub type QuoteResponse = ApiEnvelope<HashMap<String, FullQuote>>;

/// One instrument in a `/quote` response.
#[derive(Debug, Clone, Deserialize)]
pub struct FullQuote {
    /// Streaming token.
    #[serde(default)]
    pub instrument_token: u32,
    /// Exchange time, `YYYY-MM-DD HH:MM:SS` IST.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Last traded price.
    pub last_price: Decimal,
    /// Day volume.
    #[serde(default)]
    pub volume: Option<u64>,
    /// Open interest.
    #[serde(default)]
    pub oi: Option<u64>,
    /// Market depth.
    #[serde(default)]
    pub depth: Option<Depth>,
}

/// Five levels each side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Depth {
    /// Bids, best first.
    #[serde(default)]
    pub buy: Vec<DepthLevel>,
    /// Asks, best first.
    #[serde(default)]
    pub sell: Vec<DepthLevel>,
}

/// One depth level.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthLevel {
    /// Price.
    pub price: Decimal,
    /// Quantity.
    #[serde(default)]
    pub quantity: u64,
    /// Order count.
    #[serde(default)]
    pub orders: u32,
}

impl FullQuote {
    /// Convert into port-level quote fields.
    #[must_use]
    pub fn into_upstream(self) -> UpstreamQuote {
        let best = |levels: &[DepthLevel]| {
            levels
                .first()
                .map(|level| level.price)
                .filter(|price| *price > Decimal::ZERO)
        };
        let (bid, ask) = self
            .depth
            .as_ref()
            .map_or((None, None), |depth| (best(&depth.buy), best(&depth.sell)));

        UpstreamQuote {
            last_price: self.last_price,
            bid,
            ask,
            volume: self.volume,
            open_interest: self.oi.filter(|oi| *oi > 0),
            exchange_time: self.timestamp.as_deref().and_then(parse_exchange_time),
        }
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS` in IST into UTC.
#[must_use]
pub fn parse_exchange_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    let ist = FixedOffset::east_opt(IST_OFFSET_SECS)?;
    ist.from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

// =============================================================================
// Ticker
// =============================================================================

/// Tick detail level requested from the ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Last price only.
    Ltp,
    /// Price, volume and OHLC.
    Quote,
    /// Quote plus depth and OI.
    Full,
}

/// Client to server control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "a", content = "v", rename_all = "lowercase")]
pub enum TickerRequest {
    /// Subscribe to tokens.
    Subscribe(Vec<u32>),
    /// Unsubscribe from tokens.
    Unsubscribe(Vec<u32>),
    /// Set the detail level for tokens.
    Mode(StreamMode, Vec<u32>),
}

impl TickerRequest {
    /// Serialize to the text frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server to client text message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TickerEvent {
    /// Error notice; usually followed by a close.
    Error(serde_json::Value),
    /// Informational broadcast.
    Message(serde_json::Value),
    /// Order postback (ignored by this service).
    Order(serde_json::Value),
}
