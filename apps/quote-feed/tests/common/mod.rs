//! Shared fixtures for the integration tests.
//!
//! - `ScriptedTransport`: a `TickTransport` that plays back one script per
//!   connection attempt
//! - `ScriptedProvider`: a `QuoteProviderPort` with per-key behavior and
//!   call counting
//! - `FixedStream`: a `StreamControlPort` whose state is set by the test

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use quote_feed::application::ports::{
    ConnectionError, FetchError, QuoteProviderPort, StreamControlPort, UpstreamQuote,
};
use quote_feed::application::services::{
    ConcurrentFetcher, FallbackOrchestrator, FetcherConfig, OrchestratorConfig, QuoteCache,
    SharedQuoteCache, SyntheticConfig, SyntheticGenerator,
};
use quote_feed::infrastructure::kite::{
    PacketKind, ReconnectConfig, StreamConnector, StreamConnectorConfig, Tick, TickFrame,
    TickSession, TickTransport,
};
use quote_feed::{ConnectionState, InstrumentKey, InstrumentRegistry, ManualClock};

// =============================================================================
// Scripted Transport
// =============================================================================

/// One step of a scripted session.
#[derive(Debug, Clone)]
pub enum Step {
    /// Yield this frame.
    Frame(TickFrame),
    /// Yield this error.
    Fail(ConnectionError),
    /// Sleep before the next step.
    Wait(Duration),
    /// Yield a heartbeat every interval, forever.
    HeartbeatsEvery(Duration),
    /// Never yield again.
    Hang,
}

/// What one connection attempt does.
#[derive(Debug, Clone)]
pub enum Script {
    /// `connect` fails.
    Refuse(ConnectionError),
    /// `connect` never returns.
    Stall,
    /// `connect` succeeds and the session plays these steps. The socket
    /// closes once they run out.
    Session(Vec<Step>),
}

#[derive(Default)]
struct TransportShared {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    subscriptions: Mutex<Vec<Vec<u32>>>,
}

/// Plays back one queued script per `connect`. Once the queue is empty every
/// attempt is refused.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<TransportShared>,
}

impl ScriptedTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        let transport = Self::default();
        for script in scripts {
            transport.push(script);
        }
        transport
    }

    pub fn push(&self, script: Script) {
        self.shared.scripts.lock().push_back(script);
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<Vec<u32>> {
        self.shared.subscriptions.lock().clone()
    }
}

#[async_trait]
impl TickTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn TickSession>, ConnectionError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.shared.scripts.lock().pop_front();
        match script {
            None => Err(ConnectionError::Handshake("connection refused".to_string())),
            Some(Script::Refuse(error)) => Err(error),
            Some(Script::Stall) => std::future::pending().await,
            Some(Script::Session(steps)) => Ok(Box::new(ScriptedSession {
                steps: steps.into(),
                shared: Arc::clone(&self.shared),
            })),
        }
    }
}

struct ScriptedSession {
    steps: VecDeque<Step>,
    shared: Arc<TransportShared>,
}

#[async_trait]
impl TickSession for ScriptedSession {
    async fn subscribe(&mut self, tokens: &[u32]) -> Result<(), ConnectionError> {
        self.shared.subscriptions.lock().push(tokens.to_vec());
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<TickFrame, ConnectionError>> {
        loop {
            match self.steps.pop_front()? {
                Step::Frame(frame) => return Some(Ok(frame)),
                Step::Fail(error) => return Some(Err(error)),
                Step::Wait(delay) => tokio::time::sleep(delay).await,
                Step::HeartbeatsEvery(interval) => {
                    self.steps.push_front(Step::HeartbeatsEvery(interval));
                    tokio::time::sleep(interval).await;
                    return Some(Ok(TickFrame::Heartbeat));
                }
                Step::Hang => return std::future::pending().await,
            }
        }
    }
}

/// A quote-mode tick at `rupees`.
pub fn tick(token: u32, rupees: i64) -> Tick {
    Tick {
        token,
        kind: PacketKind::Quote,
        last_price: Decimal::from(rupees),
        volume: Some(1_000),
        bid: None,
        ask: None,
        open_interest: None,
        exchange_time: None,
    }
}

/// A frame carrying one tick.
pub fn ticks(token: u32, rupees: i64) -> Step {
    Step::Frame(TickFrame::Ticks(vec![tick(token, rupees)]))
}

pub fn heartbeat() -> Step {
    Step::Frame(TickFrame::Heartbeat)
}

// =============================================================================
// Scripted Provider
// =============================================================================

/// How the provider answers for a key.
#[derive(Debug, Clone)]
pub enum Answer {
    Price(Decimal),
    Fail(FetchError),
    Slow(Duration, Decimal),
}

/// Direct quote provider with per-key answers.
pub struct ScriptedProvider {
    answers: Mutex<HashMap<InstrumentKey, Answer>>,
    fallback: Mutex<Answer>,
    calls: Mutex<HashMap<InstrumentKey, usize>>,
    total: AtomicUsize,
}

impl ScriptedProvider {
    /// Every key answers `price`.
    pub fn priced(price: i64) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Answer::Price(Decimal::from(price))),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        })
    }

    /// Every key fails with a connection error.
    pub fn down() -> Arc<Self> {
        let provider = Self::priced(0);
        provider.answer_all(Answer::Fail(FetchError::Connection("upstream down".into())));
        provider
    }

    pub fn answer(&self, key: &InstrumentKey, answer: Answer) {
        self.answers.lock().insert(key.clone(), answer);
    }

    pub fn answer_all(&self, answer: Answer) {
        self.answers.lock().clear();
        *self.fallback.lock() = answer;
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: &InstrumentKey) -> usize {
        self.calls.lock().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl QuoteProviderPort for ScriptedProvider {
    async fn fetch_quote(&self, key: &InstrumentKey) -> Result<UpstreamQuote, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(key.clone()).or_default() += 1;

        let answer = self
            .answers
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.fallback.lock().clone());
        match answer {
            Answer::Price(price) => Ok(UpstreamQuote::last_price(price)),
            Answer::Fail(error) => Err(error),
            Answer::Slow(delay, price) => {
                tokio::time::sleep(delay).await;
                Ok(UpstreamQuote::last_price(price))
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// =============================================================================
// Fixed Stream
// =============================================================================

/// Stream control stub: `start` subscribes, `stop` disconnects, and the test
/// can force any state.
#[derive(Debug, Default)]
pub struct FixedStream {
    state: Mutex<ConnectionState>,
    starts: AtomicUsize,
}

impl FixedStream {
    pub fn with_state(state: ConnectionState) -> Arc<Self> {
        let stream = Arc::new(Self::default());
        stream.set(state);
        stream
    }

    pub fn set(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamControlPort for FixedStream {
    fn health(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.set(ConnectionState::Subscribed);
    }

    async fn stop(&self) {
        self.set(ConnectionState::Disconnected);
    }
}

// =============================================================================
// Builders
// =============================================================================

pub const TTL: Duration = Duration::from_secs(2);

pub fn sbin() -> InstrumentKey {
    InstrumentKey::nse("SBIN")
}

pub fn hdfcbank() -> InstrumentKey {
    InstrumentKey::nse("HDFCBANK")
}

pub fn token_of(registry: &InstrumentRegistry, key: &InstrumentKey) -> u32 {
    registry.get(key).expect("key in registry").token
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 10, 4, 0, 0).unwrap(),
    ))
}

pub fn cache(clock: &Arc<ManualClock>) -> SharedQuoteCache {
    Arc::new(QuoteCache::new(TTL, clock.clone()))
}

/// Fast, jitter-free reconnect settings.
pub fn connector_config(max_attempts: u32) -> StreamConnectorConfig {
    StreamConnectorConfig {
        handshake_timeout: Duration::from_secs(2),
        watchdog_window: Duration::from_secs(3),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        },
        stop_grace: Duration::from_secs(1),
    }
}

pub fn connector(
    transport: ScriptedTransport,
    registry: &Arc<InstrumentRegistry>,
    cache: &SharedQuoteCache,
    config: StreamConnectorConfig,
) -> StreamConnector<ScriptedTransport> {
    StreamConnector::new(
        transport,
        Arc::clone(registry),
        Arc::clone(cache),
        config,
        CancellationToken::new(),
    )
}

pub fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        refill_deadline: Duration::from_secs(3),
        poll_interval: Duration::from_secs(4),
        recovery_interval: None,
        shutdown_grace: Duration::from_secs(1),
        max_extra_keys: 4,
    }
}

pub fn orchestrator(
    registry: &Arc<InstrumentRegistry>,
    cache: &SharedQuoteCache,
    provider: Arc<dyn QuoteProviderPort>,
    stream: Arc<dyn StreamControlPort>,
    config: OrchestratorConfig,
) -> Arc<FallbackOrchestrator> {
    orchestrator_with(registry, cache, provider, stream, config, SyntheticConfig::default())
}

pub fn orchestrator_with(
    registry: &Arc<InstrumentRegistry>,
    cache: &SharedQuoteCache,
    provider: Arc<dyn QuoteProviderPort>,
    stream: Arc<dyn StreamControlPort>,
    config: OrchestratorConfig,
    synthetic: SyntheticConfig,
) -> Arc<FallbackOrchestrator> {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(ConcurrentFetcher::new(
        provider,
        Arc::clone(cache),
        &FetcherConfig {
            workers: 4,
            call_timeout: Duration::from_millis(1500),
        },
        cancel.child_token(),
    ));
    Arc::new(FallbackOrchestrator::new(
        Arc::clone(registry),
        Arc::clone(cache),
        fetcher,
        stream,
        SyntheticGenerator::new(synthetic),
        config,
        cancel,
    ))
}

/// Wait (in paused time) until the connector reports `state`.
pub async fn wait_for_state(
    connector: &StreamConnector<ScriptedTransport>,
    state: ConnectionState,
) {
    let mut rx = connector.subscribe_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("connector never reached {state:?}"))
        .expect("state channel open");
}
