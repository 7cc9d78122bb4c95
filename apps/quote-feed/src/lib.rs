#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Quote Feed - Always-Available Quote Layer
//!
//! Keeps a short-TTL cache of quotes for an instrument basket fresh from a
//! Kite ticker subscription, falling back to background polling, direct
//! quote calls and finally deterministic synthetic quotes, so that a read
//! always answers every key without blocking on a dead upstream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Value types with no I/O
//!   - `instrument`: Instrument keys, the basket registry, contract helpers
//!   - `quote`: Quotes, sources and cache entries
//!   - `connection`: Stream connection state machine
//!   - `clock`: Injectable time source
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream quote provider, stream control, error taxonomy
//!   - `services`: Quote cache, concurrent fetcher, fallback orchestrator,
//!     synthetic generator, source status
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kite`: REST client, ticker transport, tick codec, stream connector
//!   - `config`: Environment configuration
//!   - `http`: HTTP API, health and metrics endpoints
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! Kite ticker ──► StreamConnector ──┐
//!                                   ▼
//! Kite REST ◄── ConcurrentFetcher ─► QuoteCache ◄── FallbackOrchestrator ◄── HTTP
//!                     ▲                                  │
//!                     └──────── poll / refill ───────────┘
//!                                          SyntheticGenerator (last resort)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core value types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use domain::connection::{ConnectionEvent, ConnectionState};
pub use domain::instrument::{InstrumentKey, InstrumentMeta, InstrumentRegistry};
pub use domain::quote::{Quote, QuoteSource};

// Ports
pub use application::ports::{
    ConnectionError, FetchError, QuoteError, QuoteProviderPort, StreamControlPort, UpstreamQuote,
};

// Services
pub use application::services::{
    ConcurrentFetcher, FallbackOrchestrator, FetchRequest, FetcherConfig, OrchestratorConfig,
    PollingAction, QuoteCache, QuoteSet, ServedQuote, SourceStatus, StreamAction,
    SyntheticConfig, SyntheticGenerator,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedConfig};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
