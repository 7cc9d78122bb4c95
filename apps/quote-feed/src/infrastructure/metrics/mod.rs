//! Prometheus Metrics Module
//!
//! Exposes quote-acquisition metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: ticks received, connection state, transitions, reconnects
//! - **Fetch**: refill calls by outcome, batch duration
//! - **Reads**: quotes served by source, degraded quotes
//! - **Poll**: poll cycles run or skipped
//! - **Cache**: entry count
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::quote::QuoteSource;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream
    describe_counter!(
        "quote_feed_ticks_received_total",
        "Total ticks received from the streaming connection"
    );
    describe_gauge!(
        "quote_feed_stream_state",
        "Streaming connection state (0=disconnected 1=connecting 2=connected 3=subscribed 4=reconnecting 5=failed)"
    );
    describe_counter!(
        "quote_feed_stream_transitions_total",
        "Streaming connection state transitions by target state"
    );
    describe_counter!(
        "quote_feed_reconnects_total",
        "Total streaming reconnection attempts"
    );

    // Fetch
    describe_counter!(
        "quote_feed_refill_calls_total",
        "Upstream quote calls issued by the fetcher, by outcome"
    );
    describe_histogram!(
        "quote_feed_refill_duration_seconds",
        "Wall time of one refill batch"
    );

    // Reads
    describe_counter!(
        "quote_feed_quotes_served_total",
        "Quotes returned to readers by source"
    );
    describe_counter!(
        "quote_feed_degraded_quotes_total",
        "Stale or synthetic quotes returned to readers"
    );

    // Poll
    describe_counter!(
        "quote_feed_poll_cycles_total",
        "Background poll cycles by result"
    );

    // Cache
    describe_gauge!("quote_feed_cache_entries", "Instruments held in the quote cache");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for poll cycle results.
#[derive(Debug, Clone, Copy)]
pub enum PollCycle {
    /// Refill issued.
    Run,
    /// Skipped because the stream is subscribed.
    Skipped,
}

impl PollCycle {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Skipped => "skipped",
        }
    }
}

/// Record ticks received from the stream.
pub fn record_ticks_received(count: u64) {
    counter!("quote_feed_ticks_received_total").increment(count);
}

/// Record a connection state transition.
pub fn record_stream_transition(to: ConnectionState) {
    counter!(
        "quote_feed_stream_transitions_total",
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("quote_feed_stream_state").set(f64::from(to.ordinal()));
}

/// Record a streaming reconnection attempt.
pub fn record_reconnect() {
    counter!("quote_feed_reconnects_total").increment(1);
}

/// Record one upstream call made by the fetcher.
pub fn record_refill_call(outcome: &'static str) {
    counter!(
        "quote_feed_refill_calls_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the duration of a refill batch.
pub fn record_refill_duration(duration: Duration) {
    histogram!("quote_feed_refill_duration_seconds").record(duration.as_secs_f64());
}

/// Record a quote served to a reader.
pub fn record_quote_served(source: QuoteSource, degraded: bool) {
    counter!(
        "quote_feed_quotes_served_total",
        "source" => source.as_str()
    )
    .increment(1);
    if degraded {
        counter!(
            "quote_feed_degraded_quotes_total",
            "source" => source.as_str()
        )
        .increment(1);
    }
}

/// Record a background poll cycle.
pub fn record_poll_cycle(result: PollCycle) {
    counter!(
        "quote_feed_poll_cycles_total",
        "result" => result.as_str()
    )
    .increment(1);
}

/// Update the cache size gauge.
pub fn set_cache_entries(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("quote_feed_cache_entries").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
