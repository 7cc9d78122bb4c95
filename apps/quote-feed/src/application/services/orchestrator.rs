//! Fallback Orchestrator
//!
//! Decides, per read, which source serves each key, and owns the background
//! poll cycle.
//!
//! # Read path
//!
//! 1. All requested keys fresh in the cache: serve them. While the stream is
//!    subscribed this is the stream path.
//! 2. Otherwise refill only the stale or missing keys through the fetcher,
//!    then re-read the cache.
//! 3. A key whose refill failed but which has a cache entry is served from
//!    that entry regardless of age, flagged degraded.
//! 4. A key with no cache entry at all gets a synthetic quote, flagged
//!    degraded.
//!
//! The decision in steps 1-2 is [`plan_read`], a pure function of connector
//! state and per-key freshness.
//!
//! # Background work
//!
//! - The poller refills every tracked key on a fixed interval whenever the
//!   stream is not subscribed, tagging quotes `Poll`. Tracked keys are the
//!   registry plus a bounded, least-recently-read set of other keys readers
//!   asked for. A key the upstream rejects leaves that set.
//! - The recovery loop restarts a `Failed` connector on its own interval.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FetchError, QuoteError, StreamControlPort};
use crate::application::services::fetcher::{ConcurrentFetcher, FetchRequest};
use crate::application::services::quote_cache::{CachedQuote, SharedQuoteCache};
use crate::application::services::status::{SourceStatus, SourceStatusTracker};
use crate::application::services::synthetic::SyntheticGenerator;
use crate::domain::connection::ConnectionState;
use crate::domain::instrument::{InstrumentKey, InstrumentRegistry};
use crate::domain::quote::{Quote, QuoteSource};
use crate::infrastructure::metrics::{self, PollCycle};

// =============================================================================
// Configuration
// =============================================================================

/// Shortest poll period the orchestrator accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for a refill triggered by a read or a poll.
    pub refill_deadline: Duration,
    /// Default poll period. Raised to [`MIN_POLL_INTERVAL`] if shorter.
    pub poll_interval: Duration,
    /// How often a `Failed` connector is restarted. `None` disables recovery.
    pub recovery_interval: Option<Duration>,
    /// Grace period when joining background tasks.
    pub shutdown_grace: Duration,
    /// Most non-registry keys the poller keeps refreshing.
    pub max_extra_keys: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            refill_deadline: Duration::from_secs(3),
            poll_interval: Duration::from_secs(4),
            recovery_interval: Some(Duration::from_secs(60)),
            shutdown_grace: Duration::from_secs(5),
            max_extra_keys: 32,
        }
    }
}

// =============================================================================
// Read Plan
// =============================================================================

/// What a read has to do before it can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPlan {
    /// Stream subscribed and every key fresh.
    ServeStream,
    /// Every key fresh, stream not subscribed.
    ServeCache,
    /// These keys are stale or missing and must be refilled.
    Refill(Vec<InstrumentKey>),
}

/// Decide how to serve `keys` given connector state and cache reads.
///
/// Fresh keys are never included in a refill.
#[must_use]
pub fn plan_read(
    state: ConnectionState,
    keys: &[InstrumentKey],
    cached: &HashMap<InstrumentKey, CachedQuote>,
) -> ReadPlan {
    let stale: Vec<InstrumentKey> = keys
        .iter()
        .filter(|key| !cached.get(*key).is_some_and(|c| c.is_fresh))
        .cloned()
        .collect();

    if !stale.is_empty() {
        ReadPlan::Refill(stale)
    } else if state.is_subscribed() {
        ReadPlan::ServeStream
    } else {
        ReadPlan::ServeCache
    }
}

// =============================================================================
// Read Results
// =============================================================================

/// One key's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServedQuote {
    /// Last traded price.
    pub price: Decimal,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// When the quote was observed (or generated).
    pub observed_at: DateTime<Utc>,
    /// Path that produced the quote.
    pub source: QuoteSource,
    /// Stale or synthetic.
    pub is_degraded: bool,
    /// Why the key could not be refreshed, when degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl ServedQuote {
    fn from_quote(quote: &Quote, is_degraded: bool, degraded_reason: Option<String>) -> Self {
        Self {
            price: quote.last_price,
            bid: quote.bid,
            ask: quote.ask,
            observed_at: quote.observed_at,
            source: quote.source,
            is_degraded,
            degraded_reason,
        }
    }
}

/// Answer to a `get_quotes` call. Every requested key is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteSet {
    /// Per-key answers.
    pub quotes: BTreeMap<InstrumentKey, ServedQuote>,
    /// Least preferred source used for this read, or `Stream` when the
    /// stream is subscribed and every key was fresh.
    pub active_source: QuoteSource,
    /// Connector state when the read started.
    pub connector_state: ConnectionState,
    /// When the answer was assembled.
    pub served_at: DateTime<Utc>,
}

impl QuoteSet {
    /// Number of degraded entries.
    #[must_use]
    pub fn degraded_count(&self) -> usize {
        self.quotes.values().filter(|q| q.is_degraded).count()
    }
}

// =============================================================================
// Control Surface
// =============================================================================

/// Stream lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    /// Start (or restart from `Failed`).
    Start,
    /// Stop.
    Stop,
}

/// Poller lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingAction {
    /// Start, or change the interval of a running poller.
    Start,
    /// Stop.
    Stop,
}

/// Poller state after a control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollingStatus {
    /// Whether the poller is running.
    pub active: bool,
    /// Current poll period in seconds.
    pub interval_secs: u64,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Stream subscribed; nothing fetched.
    Skipped,
    /// Refill issued.
    Refilled {
        /// Keys refreshed.
        ok: usize,
        /// Keys that failed.
        failed: usize,
    },
    /// The refill failed as a whole.
    Failed,
}

struct BackgroundTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    async fn stop(self, grace: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            tracing::warn!("Background task did not stop within grace period");
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Read entry point and background poll owner.
pub struct FallbackOrchestrator {
    registry: Arc<InstrumentRegistry>,
    cache: SharedQuoteCache,
    fetcher: Arc<ConcurrentFetcher>,
    stream: Arc<dyn StreamControlPort>,
    synthetic: SyntheticGenerator,
    status: SourceStatusTracker,
    extra_keys: Mutex<VecDeque<InstrumentKey>>,
    config: OrchestratorConfig,
    poll_interval: Mutex<Duration>,
    poller: Mutex<Option<BackgroundTask>>,
    recovery: Mutex<Option<BackgroundTask>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("extra_keys", &self.extra_keys.lock().len())
            .field("connector_state", &self.stream.health())
            .field("polling_active", &self.is_polling())
            .finish_non_exhaustive()
    }
}

impl FallbackOrchestrator {
    /// Create an orchestrator. Background tasks are not started.
    #[must_use]
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        cache: SharedQuoteCache,
        fetcher: Arc<ConcurrentFetcher>,
        stream: Arc<dyn StreamControlPort>,
        synthetic: SyntheticGenerator,
        config: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let poll_interval = Mutex::new(config.poll_interval.max(MIN_POLL_INTERVAL));
        Self {
            registry,
            cache,
            fetcher,
            stream,
            synthetic,
            status: SourceStatusTracker::new(),
            extra_keys: Mutex::new(VecDeque::new()),
            config,
            poll_interval,
            poller: Mutex::new(None),
            recovery: Mutex::new(None),
            cancel,
        }
    }

    /// The instrument registry.
    #[must_use]
    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    /// The quote cache.
    #[must_use]
    pub const fn cache(&self) -> &SharedQuoteCache {
        &self.cache
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Serve `keys` (every registry key when empty).
    ///
    /// Every requested key is answered, possibly degraded.
    ///
    /// # Errors
    ///
    /// Returns [`QuoteError::NoDataAvailable`] only if a key has never been
    /// observed, its refill failed, and no synthetic quote could be made.
    pub async fn get_quotes(&self, keys: &[InstrumentKey]) -> Result<QuoteSet, QuoteError> {
        let keys = self.normalize_keys(keys);
        let state = self.stream.health();
        let cached = self.cache.get_many(&keys);

        let plan = plan_read(state, &keys, &cached);
        let stream_path = plan == ReadPlan::ServeStream;
        let (reads, failures) = match plan {
            ReadPlan::ServeStream | ReadPlan::ServeCache => (cached, HashMap::new()),
            ReadPlan::Refill(stale) => {
                let failures = self.refill_for_read(stale).await;
                self.forget_rejected(&failures);
                (self.cache.get_many(&keys), failures)
            }
        };

        let served_at = self.cache.now();
        let mut quotes = BTreeMap::new();
        for key in &keys {
            let served = match reads.get(key) {
                Some(cached) if cached.is_fresh => ServedQuote::from_quote(&cached.quote, false, None),
                Some(cached) => ServedQuote::from_quote(
                    &cached.quote,
                    true,
                    Some(failure_reason(failures.get(key))),
                ),
                None => self.synthesize(key, served_at, failures.get(key))?,
            };
            metrics::record_quote_served(served.source, served.is_degraded);
            quotes.insert(key.clone(), served);
        }

        // A fully fresh read while subscribed is the stream path, whoever
        // wrote the entries.
        let active_source = if stream_path {
            QuoteSource::Stream
        } else {
            quotes
                .values()
                .map(|q| q.source)
                .max_by_key(QuoteSource::precedence)
                .unwrap_or(QuoteSource::Stream)
        };
        self.status.record_served(active_source, served_at);

        Ok(QuoteSet {
            quotes,
            active_source,
            connector_state: state,
            served_at,
        })
    }

    /// Refill the stale subset and return per-key failures.
    async fn refill_for_read(&self, stale: Vec<InstrumentKey>) -> HashMap<InstrumentKey, FetchError> {
        let request = FetchRequest::new(stale.iter().cloned(), self.config.refill_deadline);
        match self.fetcher.refill(request).await {
            Ok(results) => results
                .into_iter()
                .filter_map(|(key, result)| result.err().map(|err| (key, err)))
                .collect(),
            Err(err) => {
                tracing::warn!(keys = stale.len(), error = %err, "Read refill failed");
                stale.into_iter().map(|key| (key, err.clone())).collect()
            }
        }
    }

    fn synthesize(
        &self,
        key: &InstrumentKey,
        at: DateTime<Utc>,
        failure: Option<&FetchError>,
    ) -> Result<ServedQuote, QuoteError> {
        let base = self.registry.get(key).map(|meta| meta.reference_price);
        match self.synthetic.generate(key, base, at) {
            Ok(quote) => {
                tracing::debug!(key = %key, "Serving synthetic quote");
                Ok(ServedQuote::from_quote(&quote, true, Some(failure_reason(failure))))
            }
            Err(err) => {
                tracing::error!(key = %key, error = %err, "No data available");
                Err(QuoteError::NoDataAvailable {
                    key: key.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    fn normalize_keys(&self, keys: &[InstrumentKey]) -> Vec<InstrumentKey> {
        if keys.is_empty() {
            return self.registry.keys();
        }
        let mut seen = HashSet::with_capacity(keys.len());
        let keys: Vec<InstrumentKey> = keys
            .iter()
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect();
        self.track(&keys);
        keys
    }

    /// Move non-registry keys to the recent end, evicting the oldest.
    fn track(&self, keys: &[InstrumentKey]) {
        let cap = self.config.max_extra_keys;
        let mut extra = self.extra_keys.lock();
        for key in keys.iter().filter(|key| !self.registry.contains(key)) {
            if let Some(pos) = extra.iter().position(|k| k == key) {
                extra.remove(pos);
            }
            extra.push_back(key.clone());
        }
        while extra.len() > cap {
            if let Some(evicted) = extra.pop_front() {
                tracing::debug!(key = %evicted, "Stopped polling key");
            }
        }
    }

    fn forget_rejected(&self, failures: &HashMap<InstrumentKey, FetchError>) {
        let mut extra = self.extra_keys.lock();
        extra.retain(|key| !failures.get(key).is_some_and(FetchError::is_permanent));
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Observability snapshot.
    #[must_use]
    pub fn source_status(&self) -> SourceStatus {
        self.status.snapshot(
            self.stream.health(),
            self.is_polling(),
            self.poll_interval().as_secs(),
        )
    }

    /// Live connector state.
    #[must_use]
    pub fn connector_state(&self) -> ConnectionState {
        self.stream.health()
    }

    /// Keys the poller refreshes: the registry, then recently read extras.
    #[must_use]
    pub fn tracked_keys(&self) -> Vec<InstrumentKey> {
        let mut keys = self.registry.keys();
        keys.extend(self.extra_keys.lock().iter().cloned());
        keys
    }

    /// Whether the poller is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Current poll period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        *self.poll_interval.lock()
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Start or stop the stream connector.
    pub async fn control_stream(&self, action: StreamAction) -> ConnectionState {
        match action {
            StreamAction::Start => {
                tracing::info!("Stream start requested");
                self.stream.start();
            }
            StreamAction::Stop => {
                tracing::info!("Stream stop requested");
                self.stream.stop().await;
            }
        }
        self.stream.health()
    }

    /// Start, retune or stop the background poller. Repeating an action is
    /// a no-op. An interval below [`MIN_POLL_INTERVAL`] is ignored and the
    /// current period kept.
    pub async fn control_polling(
        self: &Arc<Self>,
        action: PollingAction,
        interval: Option<Duration>,
    ) -> PollingStatus {
        match action {
            PollingAction::Start => {
                let interval = match interval {
                    Some(requested) if requested >= MIN_POLL_INTERVAL => requested,
                    Some(requested) => {
                        tracing::warn!(?requested, "Ignoring poll interval below one second");
                        self.poll_interval()
                    }
                    None => self.poll_interval(),
                };
                let replaced = {
                    let mut slot = self.poller.lock();
                    let running = slot.as_ref().is_some_and(|task| !task.handle.is_finished());
                    if running && interval == self.poll_interval() {
                        None
                    } else {
                        *self.poll_interval.lock() = interval;
                        let previous = slot.take();
                        *slot = Some(self.spawn_poller(interval));
                        tracing::info!(interval_secs = interval.as_secs(), "Polling started");
                        previous
                    }
                };
                if let Some(previous) = replaced {
                    previous.stop(self.config.shutdown_grace).await;
                }
            }
            PollingAction::Stop => {
                let previous = self.poller.lock().take();
                if let Some(previous) = previous {
                    previous.stop(self.config.shutdown_grace).await;
                    tracing::info!("Polling stopped");
                }
            }
        }

        PollingStatus {
            active: self.is_polling(),
            interval_secs: self.poll_interval().as_secs(),
        }
    }

    /// Start the connector-recovery loop, if configured. Idempotent.
    pub fn start_recovery(self: &Arc<Self>) {
        let Some(interval) = self.config.recovery_interval.filter(|i| !i.is_zero()) else {
            return;
        };
        let mut slot = self.recovery.lock();
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        let cancel = self.cancel.child_token();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run_recovery(interval, token).await });
        *slot = Some(BackgroundTask { cancel, handle });
    }

    /// Run one poll cycle now.
    pub async fn poll_once(&self) -> PollOutcome {
        if self.stream.health().is_subscribed() {
            metrics::record_poll_cycle(PollCycle::Skipped);
            return PollOutcome::Skipped;
        }

        metrics::record_poll_cycle(PollCycle::Run);
        let request = FetchRequest::new(self.tracked_keys(), self.config.refill_deadline)
            .with_origin(QuoteSource::Poll);
        let outcome = match self.fetcher.refill(request).await {
            Ok(results) => {
                let ok = results.values().filter(|r| r.is_ok()).count();
                let failures: HashMap<InstrumentKey, FetchError> = results
                    .iter()
                    .filter_map(|(key, r)| r.as_ref().err().map(|err| (key.clone(), err.clone())))
                    .collect();
                self.forget_rejected(&failures);
                PollOutcome::Refilled {
                    ok,
                    failed: results.len() - ok,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Poll refill failed");
                PollOutcome::Failed
            }
        };
        self.status.record_poll(self.cache.now());
        outcome
    }

    /// Stop background work, the stream connector and fetcher workers.
    pub async fn shutdown(&self) {
        let grace = self.config.shutdown_grace;
        let poller = self.poller.lock().take();
        if let Some(task) = poller {
            task.stop(grace).await;
        }
        let recovery = self.recovery.lock().take();
        if let Some(task) = recovery {
            task.stop(grace).await;
        }
        self.stream.stop().await;
        if self.fetcher.shutdown(grace).await {
            tracing::info!("Orchestrator stopped");
        }
    }

    fn spawn_poller(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        let cancel = self.cancel.child_token();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run_poller(interval, token).await });
        BackgroundTask { cancel, handle }
    }

    async fn run_poller(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Poller cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = tokio::select! {
                        () = cancel.cancelled() => break,
                        outcome = self.poll_once() => outcome,
                    };
                    tracing::trace!(?outcome, "Poll cycle");
                }
            }
        }
    }

    async fn run_recovery(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; recovery waits a full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.stream.health() == ConnectionState::Failed {
                        tracing::info!("Restarting failed stream connector");
                        self.stream.start();
                    }
                }
            }
        }
    }
}

fn failure_reason(failure: Option<&FetchError>) -> String {
    failure.map_or_else(|| "refresh unavailable".to_string(), ToString::to_string)
}
