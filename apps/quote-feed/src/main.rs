//! Quote Feed Binary
//!
//! Starts the quote feed: stream connector, background poller and HTTP API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Upstream (optional; the service runs offline without them)
//! - `KITE_API_KEY`: Kite Connect API key
//! - `KITE_ACCESS_TOKEN`: Kite Connect access token for the day
//!
//! ## Optional
//! - `HTTP_PORT`: HTTP API port (default: 5000)
//! - `QUOTE_TTL_MS`: Cache TTL (default: 2000)
//! - `POLL_INTERVAL_SECS`: Background poll period (default: 4)
//! - `STREAM_ENABLED` / `POLL_ENABLED`: Start at boot (default: true)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)
//!
//! See `FeedConfig` for the full list.

use std::sync::Arc;

use anyhow::Context;
use quote_feed::application::ports::{QuoteProviderPort, StreamControlPort};
use quote_feed::application::services::{
    ConcurrentFetcher, FallbackOrchestrator, PollingAction, QuoteCache, StreamAction,
    SyntheticGenerator,
};
use quote_feed::infrastructure::http::{AppState, HttpServer};
use quote_feed::infrastructure::kite::{
    KiteQuoteClient, KiteTicker, OfflineQuoteProvider, OfflineStream, StreamConnector,
};
use quote_feed::infrastructure::telemetry;
use quote_feed::{FeedConfig, InstrumentRegistry, SharedClock, SystemClock, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting quote feed");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(InstrumentRegistry::banknifty());
    let clock: SharedClock = Arc::new(SystemClock);
    let cache = Arc::new(QuoteCache::new(config.cache.ttl, clock));

    let (provider, stream): (Arc<dyn QuoteProviderPort>, Arc<dyn StreamControlPort>) =
        match &config.credentials {
            Some(credentials) => {
                let client = KiteQuoteClient::new(&config.rest_config(), credentials.clone())
                    .context("failed to build Kite REST client")?;
                let ticker = KiteTicker::new(config.kite.ticker_url.clone(), credentials.clone());
                let connector = StreamConnector::new(
                    ticker,
                    Arc::clone(&registry),
                    Arc::clone(&cache),
                    config.connector_config(),
                    shutdown_token.clone(),
                );
                (Arc::new(client), Arc::new(connector))
            }
            None => {
                tracing::warn!("No Kite credentials configured; serving cached and synthetic quotes only");
                (Arc::new(OfflineQuoteProvider), Arc::new(OfflineStream))
            }
        };

    let fetcher = Arc::new(ConcurrentFetcher::new(
        provider,
        Arc::clone(&cache),
        &config.fetcher_config(),
        shutdown_token.child_token(),
    ));

    let orchestrator = Arc::new(FallbackOrchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&cache),
        fetcher,
        stream,
        SyntheticGenerator::new(config.synthetic_config()),
        config.orchestrator_config(),
        shutdown_token.clone(),
    ));

    if config.stream.enabled && config.is_online() {
        orchestrator.control_stream(StreamAction::Start).await;
        orchestrator.start_recovery();
    }
    if config.poll.enabled {
        orchestrator
            .control_polling(PollingAction::Start, Some(config.poll.interval))
            .await;
    }

    let app_state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION"),
        Arc::clone(&orchestrator),
    ));
    let http_server = HttpServer::new(config.server.http_port, app_state, shutdown_token.clone());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Quote feed ready");

    await_shutdown(&shutdown_token).await;

    orchestrator.shutdown().await;
    if tokio::time::timeout(config.server.shutdown_grace, http_handle)
        .await
        .is_err()
    {
        tracing::warn!("HTTP server did not drain within the grace period");
    }

    tracing::info!("Quote feed stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        online = config.is_online(),
        http_port = config.server.http_port,
        ttl_ms = config.cache.ttl.as_millis(),
        poll_interval_secs = config.poll.interval.as_secs(),
        workers = config.fetch.workers,
        stream_enabled = config.stream.enabled,
        poll_enabled = config.poll.enabled,
        "Configuration loaded"
    );
    tracing::debug!(
        api_base_url = %config.kite.api_base_url,
        ticker_url = %config.kite.ticker_url,
        "Kite endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
