//! Instrument Registry
//!
//! Static mapping from instrument key to exchange metadata. The registry is
//! built once at startup and shared read-only by every component.
//!
//! # Keys
//!
//! Instruments are addressed the way the upstream broker addresses them:
//! `EXCHANGE:SYMBOL`, e.g. `NSE:HDFCBANK` or `NSE:NIFTY BANK`.

pub mod contract;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Exchange
// =============================================================================

/// Exchange segment an instrument trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exchange {
    /// National Stock Exchange, cash segment.
    Nse,
    /// National Stock Exchange, futures and options segment.
    Nfo,
    /// Bombay Stock Exchange, cash segment.
    Bse,
}

impl Exchange {
    /// Upstream segment code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Nfo => "NFO",
            Self::Bse => "BSE",
        }
    }

    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NSE" => Some(Self::Nse),
            "NFO" => Some(Self::Nfo),
            "BSE" => Some(Self::Bse),
            _ => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Instrument Key
// =============================================================================

/// Stable identifier of a quote subject: exchange plus trading symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentKey {
    exchange: Exchange,
    symbol: String,
}

impl InstrumentKey {
    /// Create a key.
    #[must_use]
    pub fn new(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
        }
    }

    /// Shorthand for an NSE cash-segment key.
    #[must_use]
    pub fn nse(symbol: impl Into<String>) -> Self {
        Self::new(Exchange::Nse, symbol)
    }

    /// Exchange segment.
    #[must_use]
    pub const fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Trading symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Error parsing an instrument key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentKeyError {
    /// The `EXCHANGE:` prefix is missing.
    #[error("instrument key '{0}' is not of the form EXCHANGE:SYMBOL")]
    MissingExchange(String),
    /// The exchange segment is not recognised.
    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),
    /// The symbol part is empty.
    #[error("instrument key '{0}' has an empty symbol")]
    EmptySymbol(String),
}

impl FromStr for InstrumentKey {
    type Err = InstrumentKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (exchange, symbol) = s
            .split_once(':')
            .ok_or_else(|| InstrumentKeyError::MissingExchange(s.to_string()))?;
        let exchange = Exchange::from_str_case_insensitive(exchange.trim())
            .ok_or_else(|| InstrumentKeyError::UnknownExchange(exchange.to_string()))?;
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(InstrumentKeyError::EmptySymbol(s.to_string()));
        }
        Ok(Self::new(exchange, symbol))
    }
}

impl Serialize for InstrumentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InstrumentKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Instrument Metadata
// =============================================================================

/// What kind of instrument a registry entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// A market index (not directly tradable, streamed as an index packet).
    Index,
    /// A cash-segment equity.
    Equity,
}

/// Exchange metadata for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentMeta {
    /// Cache key.
    pub key: InstrumentKey,
    /// Upstream streaming token.
    pub token: u32,
    /// Index or equity.
    pub kind: InstrumentKind,
    /// F&O lot size.
    pub lot_size: u32,
    /// Index weight in percent (zero for the index itself).
    pub weight: Decimal,
    /// Seed price used by the synthetic generator before any observation.
    pub reference_price: Decimal,
}

impl InstrumentMeta {
    fn equity(symbol: &str, token: u32, weight: Decimal, lot_size: u32, reference_price: i64) -> Self {
        Self {
            key: InstrumentKey::nse(symbol),
            token,
            kind: InstrumentKind::Equity,
            lot_size,
            weight,
            reference_price: Decimal::from(reference_price),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Read-only instrument registry.
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    index: InstrumentKey,
    /// Constituents in registration order.
    order: Vec<InstrumentKey>,
    by_key: HashMap<InstrumentKey, InstrumentMeta>,
    by_token: HashMap<u32, InstrumentKey>,
}

impl InstrumentRegistry {
    /// Build a registry from an index entry and its constituents.
    #[must_use]
    pub fn new(index: InstrumentMeta, constituents: Vec<InstrumentMeta>) -> Self {
        let index_key = index.key.clone();
        let mut order = Vec::with_capacity(constituents.len());
        let mut by_key = HashMap::with_capacity(constituents.len() + 1);
        let mut by_token = HashMap::with_capacity(constituents.len() + 1);

        by_token.insert(index.token, index.key.clone());
        by_key.insert(index.key.clone(), index);

        for meta in constituents {
            if by_key.contains_key(&meta.key) {
                continue;
            }
            order.push(meta.key.clone());
            by_token.insert(meta.token, meta.key.clone());
            by_key.insert(meta.key.clone(), meta);
        }

        Self {
            index: index_key,
            order,
            by_key,
            by_token,
        }
    }

    /// The BankNifty index and its ten constituents.
    #[must_use]
    pub fn banknifty() -> Self {
        let index = InstrumentMeta {
            key: InstrumentKey::nse("NIFTY BANK"),
            token: 260_105,
            kind: InstrumentKind::Index,
            lot_size: 15,
            weight: Decimal::ZERO,
            reference_price: Decimal::from(45_000),
        };

        let constituents = vec![
            InstrumentMeta::equity("HDFCBANK", 341_249, Decimal::new(2861, 2), 1100, 1650),
            InstrumentMeta::equity("ICICIBANK", 1_270_529, Decimal::new(2605, 2), 700, 950),
            InstrumentMeta::equity("SBIN", 779_521, Decimal::new(911, 2), 750, 600),
            InstrumentMeta::equity("KOTAKBANK", 492_033, Decimal::new(810, 2), 400, 1800),
            InstrumentMeta::equity("AXISBANK", 54_273, Decimal::new(782, 2), 625, 1100),
            InstrumentMeta::equity("INDUSINDBK", 1_346_049, Decimal::new(337, 2), 700, 1400),
            InstrumentMeta::equity("FEDERALBNK", 1_023_553, Decimal::new(325, 2), 5000, 150),
            InstrumentMeta::equity("IDFCFIRSTB", 7_712_001, Decimal::new(311, 2), 9275, 80),
            InstrumentMeta::equity("BANDHANBNK", 2_263_297, Decimal::new(298, 2), 3600, 250),
            InstrumentMeta::equity("AUBANK", 4_708_097, Decimal::new(279, 2), 1000, 700),
        ];

        Self::new(index, constituents)
    }

    /// Metadata for a key.
    #[must_use]
    pub fn get(&self, key: &InstrumentKey) -> Option<&InstrumentMeta> {
        self.by_key.get(key)
    }

    /// Whether the key is registered.
    #[must_use]
    pub fn contains(&self, key: &InstrumentKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Key for an upstream streaming token.
    #[must_use]
    pub fn by_token(&self, token: u32) -> Option<&InstrumentKey> {
        self.by_token.get(&token)
    }

    /// The index entry.
    #[must_use]
    pub fn index(&self) -> Option<&InstrumentMeta> {
        self.by_key.get(&self.index)
    }

    /// Constituents in registration order.
    pub fn constituents(&self) -> impl Iterator<Item = &InstrumentMeta> {
        self.order.iter().filter_map(|key| self.by_key.get(key))
    }

    /// Every tracked key: the index first, then constituents.
    #[must_use]
    pub fn keys(&self) -> Vec<InstrumentKey> {
        std::iter::once(self.index.clone())
            .chain(self.order.iter().cloned())
            .collect()
    }

    /// Every streaming token.
    #[must_use]
    pub fn tokens(&self) -> Vec<u32> {
        self.keys()
            .iter()
            .filter_map(|key| self.by_key.get(key).map(|meta| meta.token))
            .collect()
    }

    /// Sum of constituent weights in percent.
    #[must_use]
    pub fn total_weight(&self) -> Decimal {
        self.constituents().map(|meta| meta.weight).sum()
    }

    /// Number of registered instruments, index included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
