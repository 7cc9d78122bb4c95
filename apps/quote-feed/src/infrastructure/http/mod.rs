//! HTTP API, Health Check and Metrics Endpoint
//!
//! Read and control surface over the fallback orchestrator, plus the probes
//! used by container orchestrators and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /api/quotes?keys=NSE:SBIN,NSE:HDFCBANK` - current quotes
//! - `GET /api/status` - which source served the last read
//! - `GET /api/instruments` - the instrument basket
//! - `POST /api/stream/{start|stop}` - connector control
//! - `POST /api/polling/{start|stop}?interval_secs=N` - poller control

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteError;
use crate::application::services::{
    FallbackOrchestrator, PollingAction, PollingStatus, SourceStatus, StreamAction,
};
use crate::domain::connection::ConnectionState;
use crate::domain::instrument::{InstrumentKey, InstrumentMeta};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream connector state.
    pub connector_state: ConnectionState,
    /// Poller state.
    pub polling: PollingStatus,
    /// Cache occupancy.
    pub cache: CacheInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream subscribed.
    Healthy,
    /// Serving from poll, direct calls or synthetic quotes.
    Degraded,
    /// Stream failed and nothing is refreshing the cache.
    Unhealthy,
}

/// Cache occupancy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheInfo {
    /// Entries held.
    pub entries: usize,
    /// Entries still within TTL.
    pub fresh: usize,
}

/// Instrument basket.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentsResponse {
    /// The index.
    pub index: Option<InstrumentMeta>,
    /// Constituents, registry order.
    pub constituents: Vec<InstrumentMeta>,
    /// Sum of constituent weights.
    pub total_weight: Decimal,
}

#[derive(Debug, Serialize)]
struct StreamControlResponse {
    connector_state: ConnectionState,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct QuotesQuery {
    keys: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollingQuery {
    interval_secs: Option<u64>,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct AppState {
    version: String,
    started_at: Instant,
    orchestrator: Arc<FallbackOrchestrator>,
}

impl AppState {
    /// Create new server state.
    #[must_use]
    pub fn new(version: impl Into<String>, orchestrator: Arc<FallbackOrchestrator>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            orchestrator,
        }
    }
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/quotes", get(quotes_handler))
        .route("/api/status", get(status_handler))
        .route("/api/instruments", get(instruments_handler))
        .route("/api/stream/{action}", post(stream_control_handler))
        .route("/api/polling/{action}", post(polling_control_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP API server.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// Request failures rendered as JSON.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NoData(QuoteError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NoData(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

// =============================================================================
// Probe Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if build_health_response(&state).status == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let orchestrator = &state.orchestrator;
    let connector_state = orchestrator.connector_state();
    let polling = PollingStatus {
        active: orchestrator.is_polling(),
        interval_secs: orchestrator.poll_interval().as_secs(),
    };

    HealthResponse {
        status: determine_health_status(connector_state, polling.active),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connector_state,
        polling,
        cache: CacheInfo {
            entries: orchestrator.cache().len(),
            fresh: orchestrator.cache().fresh_count(),
        },
    }
}

fn determine_health_status(connector: ConnectionState, polling: bool) -> HealthStatus {
    match connector {
        ConnectionState::Subscribed => HealthStatus::Healthy,
        ConnectionState::Failed if !polling => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// API Handlers
// =============================================================================

async fn quotes_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuotesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = parse_keys(query.keys.as_deref())?;
    let quotes = state
        .orchestrator
        .get_quotes(&keys)
        .await
        .map_err(ApiError::NoData)?;
    Ok(Json(quotes))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<SourceStatus> {
    Json(state.orchestrator.source_status())
}

async fn instruments_handler(State(state): State<Arc<AppState>>) -> Json<InstrumentsResponse> {
    let registry = state.orchestrator.registry();
    Json(InstrumentsResponse {
        index: registry.index().cloned(),
        constituents: registry.constituents().cloned().collect(),
        total_weight: registry.total_weight(),
    })
}

async fn stream_control_handler(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let action = match action.as_str() {
        "start" => StreamAction::Start,
        "stop" => StreamAction::Stop,
        other => return Err(ApiError::BadRequest(format!("unknown stream action: {other}"))),
    };
    let connector_state = state.orchestrator.control_stream(action).await;
    Ok(Json(StreamControlResponse { connector_state }))
}

async fn polling_control_handler(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Query(query): Query<PollingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let action = match action.as_str() {
        "start" => PollingAction::Start,
        "stop" => PollingAction::Stop,
        other => return Err(ApiError::BadRequest(format!("unknown polling action: {other}"))),
    };
    let interval = query.interval_secs.map(Duration::from_secs);
    let status = state.orchestrator.control_polling(action, interval).await;
    Ok(Json(status))
}

fn parse_keys(raw: Option<&str>) -> Result<Vec<InstrumentKey>, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<InstrumentKey>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
