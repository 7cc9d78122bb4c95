//! Quote Cache
//!
//! Thread-safe map from instrument key to its last-known quote and expiry.
//! This is the single source of truth for "current" data and the only
//! mutable structure shared by the stream connector, the fetcher and
//! readers.
//!
//! # Locking
//!
//! Entries are held as `Arc<CacheEntry>` in a sharded `DashMap`. A shard lock
//! is held only long enough to clone or swap one `Arc`, never across I/O, so
//! a reader sees either the previous entry or the new one in full.
//!
//! # Stream precedence
//!
//! A fresh `Stream` entry is authoritative: a poll or direct write for the
//! same key is dropped until that entry goes stale.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::clock::SharedClock;
use crate::domain::instrument::InstrumentKey;
use crate::domain::quote::{CacheEntry, Quote, QuoteSource};
use crate::infrastructure::metrics;

/// A cache read: the quote plus whether it is still within TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedQuote {
    /// The stored quote.
    pub quote: Quote,
    /// `now < expires_at` at read time.
    pub is_fresh: bool,
}

/// Result of a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The entry was created or replaced.
    Stored,
    /// A fresh stream entry already holds the key.
    ShadowedByStream,
    /// Synthetic quotes are never cached.
    NotCacheable,
}

impl PutOutcome {
    /// Whether the write took effect.
    #[must_use]
    pub const fn is_stored(self) -> bool {
        matches!(self, Self::Stored)
    }
}

/// Short-TTL quote cache.
#[derive(Debug)]
pub struct QuoteCache {
    entries: DashMap<InstrumentKey, Arc<CacheEntry>>,
    ttl: Duration,
    clock: SharedClock,
}

/// Shared cache handle.
pub type SharedQuoteCache = Arc<QuoteCache>;

impl QuoteCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(ttl: std::time::Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(1)),
            clock,
        }
    }

    /// Current time on the cache clock. Writers stamp `observed_at` with it.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Configured TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read one key. `None` means the key was never observed.
    #[must_use]
    pub fn get(&self, key: &InstrumentKey) -> Option<CachedQuote> {
        let now = self.clock.now();
        self.read_at(key, now)
    }

    /// Read several keys against a single `now`. Missing keys are absent
    /// from the result.
    #[must_use]
    pub fn get_many<'a, I>(&self, keys: I) -> HashMap<InstrumentKey, CachedQuote>
    where
        I: IntoIterator<Item = &'a InstrumentKey>,
    {
        let now = self.clock.now();
        keys.into_iter()
            .filter_map(|key| self.read_at(key, now).map(|cached| (key.clone(), cached)))
            .collect()
    }

    /// Store a quote under its own key.
    pub fn put(&self, quote: Quote) -> PutOutcome {
        if !quote.source.is_real() {
            return PutOutcome::NotCacheable;
        }

        let now = self.clock.now();
        let entry = Arc::new(CacheEntry::new(quote, self.ttl));

        let outcome = match self.entries.entry(entry.quote().key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.quote().source == QuoteSource::Stream
                    && entry.quote().source != QuoteSource::Stream
                    && current.is_fresh_at(now)
                {
                    PutOutcome::ShadowedByStream
                } else {
                    occupied.insert(entry);
                    PutOutcome::Stored
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                PutOutcome::Stored
            }
        };

        if outcome.is_stored() {
            metrics::set_cache_entries(self.entries.len());
        }
        outcome
    }

    /// Whether a key is present and within TTL.
    #[must_use]
    pub fn is_fresh(&self, key: &InstrumentKey) -> bool {
        self.get(key).is_some_and(|cached| cached.is_fresh)
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys currently within TTL.
    #[must_use]
    pub fn fresh_count(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| entry.value().is_fresh_at(now))
            .count()
    }

    fn read_at(&self, key: &InstrumentKey, now: DateTime<Utc>) -> Option<CachedQuote> {
        // Clone the Arc so the shard guard is released before copying the quote.
        let entry = self.entries.get(key).map(|guard| Arc::clone(guard.value()))?;
        Some(CachedQuote {
            quote: entry.quote().clone(),
            is_fresh: entry.is_fresh_at(now),
        })
    }
}
