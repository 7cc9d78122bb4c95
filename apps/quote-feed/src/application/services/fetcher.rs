//! Concurrent Fetcher
//!
//! Refills the quote cache for a batch of instruments by issuing one
//! upstream call per key across a bounded pool of workers.
//!
//! # Semantics
//!
//! - Each call carries its own timeout; a slow key never blocks the others.
//! - Partial success is normal: the caller gets a per-key `Result`.
//! - Successful quotes are written to the cache by the worker before the
//!   result is published, so a caller that re-reads the cache after
//!   `refill` returns sees them.
//! - The whole refill fails with [`FetchError::BatchTimeout`] only if the
//!   batch deadline elapses before any key resolves. Workers still running
//!   at the deadline keep going and apply their results to the cache.
//! - At most one upstream call per key is in flight at any time. A second
//!   refill for a key already being fetched waits on the first call's
//!   result instead of issuing another.
//! - Keys the upstream rejects as invalid are remembered and skipped until
//!   [`ConcurrentFetcher::reset_rejections`] is called.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::application::ports::{FetchError, QuoteProviderPort};
use crate::application::services::quote_cache::SharedQuoteCache;
use crate::domain::instrument::InstrumentKey;
use crate::domain::quote::{Quote, QuoteSource};
use crate::infrastructure::metrics;

/// Per-key refill outcome.
pub type FetchResult = Result<Quote, FetchError>;

/// Per-key outcomes of one refill.
pub type RefillResults = HashMap<InstrumentKey, FetchResult>;

type InFlight = watch::Receiver<Option<FetchResult>>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Maximum concurrent upstream calls.
    pub workers: usize,
    /// Deadline for one upstream call.
    pub call_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            call_timeout: Duration::from_millis(1500),
        }
    }
}

// =============================================================================
// Fetch Request
// =============================================================================

/// One refill: which keys, how long the caller is willing to wait, and
/// which source tag successful quotes carry.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Keys to fetch.
    pub keys: HashSet<InstrumentKey>,
    /// Overall batch deadline.
    pub deadline: Duration,
    /// Source tag for quotes this refill writes.
    pub origin: QuoteSource,
}

impl FetchRequest {
    /// On-demand refill (`Direct`).
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = InstrumentKey>, deadline: Duration) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            deadline,
            origin: QuoteSource::Direct,
        }
    }

    /// Override the source tag.
    #[must_use]
    pub const fn with_origin(mut self, origin: QuoteSource) -> Self {
        self.origin = origin;
        self
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Bounded-concurrency refill service.
pub struct ConcurrentFetcher {
    provider: Arc<dyn QuoteProviderPort>,
    cache: SharedQuoteCache,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
    in_flight: Arc<DashMap<InstrumentKey, InFlight>>,
    rejected: Arc<DashMap<InstrumentKey, FetchError>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConcurrentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentFetcher")
            .field("provider", &self.provider.name())
            .field("workers", &self.permits.available_permits())
            .field("call_timeout", &self.call_timeout)
            .field("in_flight", &self.in_flight.len())
            .field("rejected", &self.rejected.len())
            .finish_non_exhaustive()
    }
}

impl ConcurrentFetcher {
    /// Create a fetcher writing into `cache`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn QuoteProviderPort>,
        cache: SharedQuoteCache,
        config: &FetcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            cache,
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            call_timeout: config.call_timeout,
            in_flight: Arc::new(DashMap::new()),
            rejected: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Fetch every key in `request`, writing successes to the cache.
    ///
    /// # Errors
    ///
    /// - [`FetchError::BatchTimeout`] if the deadline elapses before any key
    ///   resolves.
    /// - [`FetchError::Cancelled`] if the fetcher is shutting down.
    pub async fn refill(&self, request: FetchRequest) -> Result<RefillResults, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let started = Instant::now();
        let deadline_at = tokio::time::Instant::now() + request.deadline;
        let requested: Vec<InstrumentKey> = request.keys.iter().cloned().collect();
        let mut results = RefillResults::with_capacity(requested.len());
        let mut waiters = FuturesUnordered::new();

        for key in request.keys {
            if let Some(err) = self.rejected.get(&key).map(|entry| entry.value().clone()) {
                metrics::record_refill_call("skipped");
                results.insert(key, Err(err));
                continue;
            }

            let mut rx = self.join_or_spawn(&key, request.origin);
            waiters.push(async move {
                let published = rx
                    .wait_for(Option::is_some)
                    .await
                    .map(|value| (*value).clone());
                let result = match published {
                    Ok(Some(result)) => result,
                    Ok(None) | Err(_) => Err(FetchError::Cancelled),
                };
                (key, result)
            });
        }

        let deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(deadline);

        let mut timed_out = false;
        loop {
            tokio::select! {
                next = waiters.next() => match next {
                    Some((key, result)) => {
                        results.insert(key, result);
                    }
                    None => break,
                },
                () = &mut deadline => {
                    timed_out = true;
                    break;
                }
                () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
        drop(waiters);
        metrics::record_refill_duration(started.elapsed());

        if timed_out {
            if results.is_empty() {
                tracing::warn!(
                    deadline_ms = request.deadline.as_millis(),
                    keys = requested.len(),
                    "Refill deadline elapsed before any result"
                );
                return Err(FetchError::BatchTimeout(request.deadline));
            }
            // Workers still running keep going and write to the cache on their own.
            for key in requested {
                results
                    .entry(key)
                    .or_insert(Err(FetchError::Timeout(request.deadline)));
            }
        }

        let ok = results.values().filter(|r| r.is_ok()).count();
        tracing::debug!(
            origin = request.origin.as_str(),
            resolved = results.len(),
            ok,
            failed = results.len() - ok,
            timed_out,
            elapsed_ms = started.elapsed().as_millis(),
            "Refill complete"
        );

        Ok(results)
    }

    /// Forget every rejected key so the next refill tries them again.
    pub fn reset_rejections(&self) {
        let count = self.rejected.len();
        self.rejected.clear();
        if count > 0 {
            tracing::info!(count, "Cleared rejected instruments");
        }
    }

    /// Keys currently marked as rejected by the upstream.
    #[must_use]
    pub fn rejected_keys(&self) -> Vec<InstrumentKey> {
        self.rejected.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of upstream calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Cancel outstanding calls and wait up to `grace` for workers to exit.
    ///
    /// Returns `true` if every worker was joined in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        let joined = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !joined {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Fetcher workers did not exit within grace period"
            );
        }
        joined
    }

    /// Attach to the in-flight call for `key`, or start one.
    fn join_or_spawn(&self, key: &InstrumentKey, origin: QuoteSource) -> InFlight {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx.clone());
                self.spawn_worker(key.clone(), origin, tx, rx.clone());
                rx
            }
        }
    }

    fn spawn_worker(
        &self,
        key: InstrumentKey,
        origin: QuoteSource,
        tx: watch::Sender<Option<FetchResult>>,
        own: InFlight,
    ) {
        let worker = Worker {
            provider: Arc::clone(&self.provider),
            cache: Arc::clone(&self.cache),
            permits: Arc::clone(&self.permits),
            call_timeout: self.call_timeout,
            rejected: Arc::clone(&self.rejected),
            cancel: self.cancel.clone(),
        };
        let in_flight = Arc::clone(&self.in_flight);

        self.tracker.spawn(async move {
            let result = worker.fetch(&key, origin).await;
            let _ = tx.send(Some(result));
            in_flight.remove_if(&key, |_, rx| rx.same_channel(&own));
        });
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Everything one upstream call needs, detached from the fetcher's lifetime.
struct Worker {
    provider: Arc<dyn QuoteProviderPort>,
    cache: SharedQuoteCache,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
    rejected: Arc<DashMap<InstrumentKey, FetchError>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn fetch(&self, key: &InstrumentKey, origin: QuoteSource) -> FetchResult {
        let _permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| FetchError::Cancelled)?
            }
        };

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(self.call_timeout, self.provider.fetch_quote(key)) => {
                result.unwrap_or(Err(FetchError::Timeout(self.call_timeout)))
            }
        };

        match outcome {
            Ok(upstream) => {
                metrics::record_refill_call("ok");
                let quote = upstream.into_quote(key.clone(), self.cache.now(), origin);
                self.cache.put(quote.clone());
                Ok(quote)
            }
            Err(err) => {
                metrics::record_refill_call(err.kind());
                if err.is_permanent() {
                    if self.rejected.insert(key.clone(), err.clone()).is_none() {
                        tracing::warn!(key = %key, error = %err, "Upstream rejected instrument, skipping until reset");
                    }
                } else {
                    tracing::debug!(key = %key, error = %err, "Quote fetch failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::UpstreamQuote;
    use crate::application::services::quote_cache::QuoteCache;
    use crate::domain::clock::SystemClock;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider with per-symbol behaviour driven by the symbol name.
    #[derive(Default)]
    struct ScriptedProvider {
        calls: AtomicUsize,
        concurrent: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl QuoteProviderPort for ScriptedProvider {
        async fn fetch_quote(&self, key: &InstrumentKey) -> Result<UpstreamQuote, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let symbol = key.symbol();
            let result = if symbol.starts_with("SLOW") {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(UpstreamQuote::last_price(Decimal::ONE))
            } else if symbol.starts_with("BAD") {
                Err(FetchError::UpstreamRejected(symbol.to_string()))
            } else if symbol.starts_with("DOWN") {
                Err(FetchError::Upstream("503".into()))
            } else {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(UpstreamQuote::last_price(Decimal::from(100)))
            };

            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn fetcher(provider: Arc<ScriptedProvider>, workers: usize) -> (ConcurrentFetcher, SharedQuoteCache) {
        let cache = Arc::new(QuoteCache::new(Duration::from_secs(2), Arc::new(SystemClock)));
        let config = FetcherConfig {
            workers,
            call_timeout: Duration::from_millis(200),
        };
        let fetcher = ConcurrentFetcher::new(provider, Arc::clone(&cache), &config, CancellationToken::new());
        (fetcher, cache)
    }

    fn keys(symbols: &[&str]) -> Vec<InstrumentKey> {
        symbols.iter().map(|s| InstrumentKey::nse(*s)).collect()
    }

    #[tokio::test]
    async fn partial_success_is_per_key() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, cache) = fetcher(Arc::clone(&provider), 4);

        let mut symbols: Vec<String> = (0..7).map(|i| format!("OK{i}")).collect();
        symbols.extend((0..3).map(|i| format!("DOWN{i}")));
        let symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();

        let started = Instant::now();
        let results = fetcher
            .refill(FetchRequest::new(keys(&symbols), Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(results.len(), 10);
        assert_eq!(results.values().filter(|r| r.is_ok()).count(), 7);
        assert_eq!(results.values().filter(|r| r.is_err()).count(), 3);
        assert_eq!(cache.len(), 7);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn pool_width_bounds_concurrency() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, _) = fetcher(Arc::clone(&provider), 2);

        let symbols: Vec<String> = (0..8).map(|i| format!("OK{i}")).collect();
        let symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();
        fetcher
            .refill(FetchRequest::new(keys(&symbols), Duration::from_secs(3)))
            .await
            .unwrap();

        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn slow_key_times_out_without_blocking_others() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, cache) = fetcher(provider, 4);

        let results = fetcher
            .refill(FetchRequest::new(keys(&["OK", "SLOW"]), Duration::from_secs(3)))
            .await
            .unwrap();

        assert!(results[&InstrumentKey::nse("OK")].is_ok());
        assert!(matches!(
            results[&InstrumentKey::nse("SLOW")],
            Err(FetchError::Timeout(_))
        ));
        assert!(cache.get(&InstrumentKey::nse("SLOW")).is_none());
    }

    #[tokio::test]
    async fn batch_timeout_when_nothing_resolves() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, _) = fetcher(provider, 4);

        let result = fetcher
            .refill(FetchRequest::new(keys(&["SLOW"]), Duration::from_millis(50)))
            .await;
        assert_eq!(result, Err(FetchError::BatchTimeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn rejected_keys_are_skipped_until_reset() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, _) = fetcher(Arc::clone(&provider), 4);
        let request = || FetchRequest::new(keys(&["BAD"]), Duration::from_secs(1));

        let first = fetcher.refill(request()).await.unwrap();
        assert!(matches!(first[&InstrumentKey::nse("BAD")], Err(FetchError::UpstreamRejected(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let second = fetcher.refill(request()).await.unwrap();
        assert!(second[&InstrumentKey::nse("BAD")].is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.rejected_keys(), keys(&["BAD"]));

        fetcher.reset_rejections();
        fetcher.refill(request()).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_refills_share_one_call() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, _) = fetcher(Arc::clone(&provider), 4);
        let fetcher = Arc::new(fetcher);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let fetcher = Arc::clone(&fetcher);
            handles.push(tokio::spawn(async move {
                fetcher
                    .refill(FetchRequest::new(keys(&["OK"]), Duration::from_secs(1)))
                    .await
            }));
        }
        for handle in handles {
            let results = handle.await.unwrap().unwrap();
            assert!(results[&InstrumentKey::nse("OK")].is_ok());
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn origin_tag_is_applied() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, cache) = fetcher(provider, 4);

        fetcher
            .refill(FetchRequest::new(keys(&["OK"]), Duration::from_secs(1)).with_origin(QuoteSource::Poll))
            .await
            .unwrap();
        assert_eq!(
            cache.get(&InstrumentKey::nse("OK")).unwrap().quote.source,
            QuoteSource::Poll
        );
    }

    #[tokio::test]
    async fn shutdown_rejects_new_refills_and_joins_workers() {
        let provider = Arc::new(ScriptedProvider::default());
        let (fetcher, _) = fetcher(provider, 4);
        let fetcher = Arc::new(fetcher);

        let background = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move {
                fetcher
                    .refill(FetchRequest::new(keys(&["SLOW"]), Duration::from_secs(10)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(fetcher.shutdown(Duration::from_secs(1)).await);
        assert_eq!(background.await.unwrap(), Err(FetchError::Cancelled));
        assert_eq!(
            fetcher
                .refill(FetchRequest::new(keys(&["OK"]), Duration::from_secs(1)))
                .await,
            Err(FetchError::Cancelled)
        );
    }
}
