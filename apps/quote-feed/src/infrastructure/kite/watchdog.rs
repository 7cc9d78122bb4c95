//! Tick Watchdog
//!
//! Detects a silently dead stream: the socket is open but no data tick has
//! arrived within the configured window. Protocol heartbeats do not feed
//! the watchdog.
//!
//! The connector's receive loop races the next frame against
//! [`TickWatchdog::deadline`]; when the deadline wins the connection is
//! abandoned and the connector reconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Watchdog state shared between the receive loop and status readers.
#[derive(Debug)]
pub struct TickWatchdog {
    window: Duration,
    last_tick: RwLock<Instant>,
    ticks: AtomicU64,
}

impl TickWatchdog {
    /// Create a watchdog armed from now.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_tick: RwLock::new(Instant::now()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Record `count` data ticks.
    pub fn record_ticks(&self, count: u64) {
        *self.last_tick.write() = Instant::now();
        self.ticks.fetch_add(count, Ordering::Relaxed);
    }

    /// Re-arm for a new connection.
    pub fn reset(&self) {
        *self.last_tick.write() = Instant::now();
    }

    /// When the watchdog trips if no further tick arrives.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        *self.last_tick.read() + self.window
    }

    /// Whether the window has elapsed without a tick.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline()
    }

    /// Time since the last tick (or since arming).
    #[must_use]
    pub fn time_since_tick(&self) -> Duration {
        self.last_tick.read().elapsed()
    }

    /// Ticks seen since creation.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Configured window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}
