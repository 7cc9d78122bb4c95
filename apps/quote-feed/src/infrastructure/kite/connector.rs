//! Stream Connector
//!
//! Owns the single long-lived ticker subscription. One task runs the
//! receive loop; it is the only writer of [`ConnectionState`], and every
//! state change goes through [`ConnectionState::next`].
//!
//! ```text
//!  start ─► Connecting ─socket─► Connected ─first frame─► Subscribed
//!              ▲   │                 │                      │
//!              │   └─────────────────┴──── fail/close/watchdog
//!              │                                            ▼
//!              └──────────── backoff elapsed ──────── Reconnecting
//!                                                           │ budget spent
//!                                                           ▼
//!                                                        Failed
//! ```
//!
//! Kite sends no explicit subscription acknowledgement; the first frame
//! (tick or heartbeat) after the subscribe request serves as one. Connect,
//! subscribe and that first frame share one handshake deadline.
//!
//! Ticks are written straight into the quote cache, stamped with the
//! cache clock. The cache write is a short per-key lock, so the receive
//! loop never waits on readers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{Tick, TickFrame};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::ticker::{TickSession, TickTransport};
use super::watchdog::TickWatchdog;
use crate::application::ports::{ConnectionError, StreamControlPort, UpstreamQuote};
use crate::application::services::SharedQuoteCache;
use crate::domain::connection::{ConnectionEvent, ConnectionState};
use crate::domain::instrument::InstrumentRegistry;
use crate::domain::quote::QuoteSource;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Stream connector tuning.
#[derive(Debug, Clone)]
pub struct StreamConnectorConfig {
    /// Deadline for connect + subscribe + first frame.
    pub handshake_timeout: Duration,
    /// Longest gap between data ticks before the socket is abandoned.
    pub watchdog_window: Duration,
    /// Backoff between attempts.
    pub reconnect: ReconnectConfig,
    /// How long `stop` waits for the receive loop to exit.
    pub stop_grace: Duration,
}

impl Default for StreamConnectorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            watchdog_window: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Long-lived ticker subscription writing through to the quote cache.
pub struct StreamConnector<T: TickTransport> {
    inner: Arc<Inner<T>>,
    worker: Mutex<Option<Worker>>,
    shutdown: CancellationToken,
}

struct Inner<T> {
    transport: T,
    registry: Arc<InstrumentRegistry>,
    cache: SharedQuoteCache,
    config: StreamConnectorConfig,
    state: watch::Sender<ConnectionState>,
    watchdog: TickWatchdog,
}

impl<T: TickTransport> std::fmt::Debug for StreamConnector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnector")
            .field("state", &self.health())
            .field("ticks", &self.inner.watchdog.tick_count())
            .finish_non_exhaustive()
    }
}

impl<T: TickTransport> StreamConnector<T> {
    /// Create a stopped connector. `shutdown` is the process-wide token;
    /// each run uses a child of it.
    #[must_use]
    pub fn new(
        transport: T,
        registry: Arc<InstrumentRegistry>,
        cache: SharedQuoteCache,
        config: StreamConnectorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let watchdog = TickWatchdog::new(config.watchdog_window);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                cache,
                config,
                state,
                watchdog,
            }),
            worker: Mutex::new(None),
            shutdown,
        }
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Data ticks received since creation.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.inner.watchdog.tick_count()
    }

    /// Whether the receive loop task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }
}

#[async_trait]
impl<T: TickTransport> StreamControlPort for StreamConnector<T> {
    fn health(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    fn start(&self) {
        let mut worker = self.worker.lock();
        if worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
        {
            tracing::debug!("Stream connector already running");
            return;
        }

        if self.inner.transition(ConnectionEvent::Start).is_none() {
            tracing::warn!(state = %self.health(), "Stream connector cannot start from this state");
            return;
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *worker = Some(Worker { cancel, handle });
    }

    async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(Worker { cancel, handle }) = worker {
            cancel.cancel();
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.inner.config.stop_grace, handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    grace_ms = self.inner.config.stop_grace.as_millis(),
                    "Stream loop did not stop in time, aborting"
                );
                abort.abort();
            }
        }
        self.inner.transition(ConnectionEvent::Stop);
    }
}

impl<T: TickTransport> Inner<T> {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Apply `event`; returns the new state, or `None` if the current state
    /// does not accept it.
    fn transition(&self, event: ConnectionEvent) -> Option<ConnectionState> {
        let mut applied = None;
        self.state.send_if_modified(|state| {
            let Some(next) = state.next(event) else {
                return false;
            };
            applied = Some((*state, next));
            *state = next;
            true
        });

        match applied {
            Some((from, to)) => {
                if from != to {
                    tracing::info!(from = %from, to = %to, event = ?event, "Stream state transition");
                    metrics::record_stream_transition(to);
                }
                Some(to)
            }
            None => {
                tracing::debug!(state = %self.state(), event = ?event, "Ignoring event");
                None
            }
        }
    }

    /// Receive loop. Entered in `Connecting`; exits on cancel or `Failed`.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let tokens = self.registry.tokens();

        loop {
            let error = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Stream connector cancelled");
                    return;
                }
                error = self.session(&tokens, &mut policy) => error,
            };
            tracing::warn!(error = %error, "Stream connection lost");

            let Some(delay) = policy.next_delay() else {
                self.transition(ConnectionEvent::RetriesExhausted);
                tracing::error!(
                    attempts = policy.attempt_count(),
                    "Stream reconnect attempts exhausted"
                );
                return;
            };

            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to ticker"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Stream connector cancelled during reconnect delay");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            self.transition(ConnectionEvent::BackoffElapsed);
        }
    }

    /// One connection from `Connecting` until it fails. Always leaves the
    /// state in `Reconnecting`.
    async fn session(&self, tokens: &[u32], policy: &mut ReconnectPolicy) -> ConnectionError {
        let timeout = self.config.handshake_timeout;
        let mut session = match tokio::time::timeout(timeout, self.handshake(tokens)).await {
            Ok(Ok(session)) => session,
            Ok(Err(error)) => {
                self.transition(ConnectionEvent::HandshakeFailed);
                return error;
            }
            Err(_) => {
                self.transition(ConnectionEvent::HandshakeFailed);
                return ConnectionError::HandshakeTimeout(timeout);
            }
        };

        policy.reset();

        loop {
            let frame = tokio::select! {
                frame = session.next_frame() => frame,
                () = tokio::time::sleep_until(self.watchdog.deadline()) => {
                    self.transition(ConnectionEvent::WatchdogTripped);
                    return ConnectionError::TickTimeout(self.watchdog.window());
                }
            };

            match frame {
                Some(Ok(frame)) => self.apply(frame),
                Some(Err(ConnectionError::Protocol(reason))) => {
                    tracing::warn!(reason = %reason, "Dropping undecodable frame");
                }
                Some(Err(error)) => {
                    self.transition(ConnectionEvent::Closed);
                    return error;
                }
                None => {
                    self.transition(ConnectionEvent::Closed);
                    return ConnectionError::Closed;
                }
            }
        }
    }

    async fn handshake(&self, tokens: &[u32]) -> Result<Box<dyn TickSession>, ConnectionError> {
        let mut session = self.transport.connect().await?;
        self.transition(ConnectionEvent::SocketOpen);

        session.subscribe(tokens).await?;
        let first = session.next_frame().await.ok_or(ConnectionError::Closed)??;

        self.watchdog.reset();
        self.transition(ConnectionEvent::SubscriptionAck);
        tracing::info!(tokens = tokens.len(), "Ticker subscription active");
        self.apply(first);
        Ok(session)
    }

    fn apply(&self, frame: TickFrame) {
        let ticks = match frame {
            TickFrame::Heartbeat => {
                tracing::trace!("Ticker heartbeat");
                return;
            }
            TickFrame::Ticks(ticks) => ticks,
        };
        if ticks.is_empty() {
            return;
        }

        let count = u64::try_from(ticks.len()).unwrap_or(u64::MAX);
        self.watchdog.record_ticks(count);
        metrics::record_ticks_received(count);

        let observed_at = self.cache.now();
        for tick in ticks {
            let Some(key) = self.registry.by_token(tick.token) else {
                tracing::trace!(token = tick.token, "Tick for untracked token");
                continue;
            };
            let quote = upstream_from_tick(&tick).into_quote(key.clone(), observed_at, QuoteSource::Stream);
            self.cache.put(quote);
        }
    }
}

fn upstream_from_tick(tick: &Tick) -> UpstreamQuote {
    UpstreamQuote {
        last_price: tick.last_price,
        bid: tick.bid,
        ask: tick.ask,
        volume: tick.volume,
        open_interest: tick.open_interest,
        exchange_time: tick.exchange_time,
    }
}
