//! HTTP API Integration Tests
//!
//! Exercises the router in-process: probes, quote reads, status, the
//! instrument list and the stream/polling control surface.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;

use common::{
    FixedStream, ScriptedProvider, manual_clock, orchestrator, orchestrator_config,
    orchestrator_with, sbin,
};
use quote_feed::application::ports::QuoteProviderPort;
use quote_feed::application::services::SharedQuoteCache;
use quote_feed::infrastructure::http::router;
use quote_feed::{
    AppState, ConnectionState, InstrumentRegistry, Quote, QuoteSource, SyntheticConfig,
    init_metrics,
};

struct TestApp {
    router: Router,
    stream: Arc<FixedStream>,
    cache: SharedQuoteCache,
}

fn app(state: ConnectionState, provider: Arc<dyn QuoteProviderPort>) -> TestApp {
    let clock = manual_clock();
    let cache = common::cache(&clock);
    let registry = Arc::new(InstrumentRegistry::banknifty());
    let stream = FixedStream::with_state(state);
    let orchestrator = orchestrator(
        &registry,
        &cache,
        provider,
        stream.clone(),
        orchestrator_config(),
    );
    TestApp {
        router: router(Arc::new(AppState::new("test-0.0.1", orchestrator))),
        stream,
        cache,
    }
}

async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(router, "GET", uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(router, "POST", uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

// =============================================================================
// Probes
// =============================================================================

#[tokio::test]
async fn liveness_always_ok() {
    let app = app(ConnectionState::Failed, ScriptedProvider::down());

    let (status, body) = send(&app.router, "GET", "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn subscribed_stream_is_healthy() {
    let app = app(ConnectionState::Subscribed, ScriptedProvider::priced(600));

    let (status, body) = get_json(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "test-0.0.1");
    assert_eq!(body["connector_state"], "subscribed");
    assert_eq!(body["polling"]["active"], false);
    assert_eq!(body["polling"]["interval_secs"], 4);
    assert_eq!(body["cache"]["entries"], 0);
}

#[tokio::test]
async fn reconnecting_stream_is_degraded_but_ready() {
    let app = app(ConnectionState::Reconnecting, ScriptedProvider::priced(600));

    let (status, body) = get_json(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    let (status, body) = send(&app.router, "GET", "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"READY");
}

#[tokio::test]
async fn failed_stream_without_polling_is_unhealthy() {
    let app = app(ConnectionState::Failed, ScriptedProvider::down());

    let (status, body) = get_json(&app.router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    let (status, _) = send(&app.router, "GET", "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, polling) = post_json(&app.router, "/api/polling/start").await;
    assert_eq!(polling["active"], true);
    let (status, body) = get_json(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn metrics_render_prometheus_text() {
    init_metrics().unwrap();
    let app = app(ConnectionState::Subscribed, ScriptedProvider::priced(600));
    let (status, _) = get_json(&app.router, "/api/quotes?keys=NSE:SBIN").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, "GET", "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("quote_feed_quotes_served_total"));
}

// =============================================================================
// Quotes
// =============================================================================

#[tokio::test]
async fn quotes_serve_cached_stream_prices() {
    let app = app(ConnectionState::Subscribed, ScriptedProvider::down());
    app.cache.put(Quote::last_price_only(
        sbin(),
        Decimal::from(600),
        app.cache.now(),
        QuoteSource::Stream,
    ));

    let (status, body) = get_json(&app.router, "/api/quotes?keys=NSE:SBIN").await;

    assert_eq!(status, StatusCode::OK);
    let quote = &body["quotes"]["NSE:SBIN"];
    assert_eq!(quote["price"], "600");
    assert_eq!(quote["source"], "stream");
    assert_eq!(quote["is_degraded"], false);
    assert_eq!(body["active_source"], "stream");
    assert_eq!(body["connector_state"], "subscribed");
}

#[tokio::test]
async fn quotes_default_to_whole_basket() {
    let app = app(ConnectionState::Disconnected, ScriptedProvider::priced(500));

    let (status, body) = get_json(&app.router, "/api/quotes").await;

    assert_eq!(status, StatusCode::OK);
    let quotes = body["quotes"].as_object().unwrap();
    assert_eq!(quotes.len(), InstrumentRegistry::banknifty().len());
    assert!(quotes.contains_key("NSE:NIFTY BANK"));
    assert_eq!(body["active_source"], "direct");
}

#[tokio::test]
async fn quotes_accept_encoded_index_names() {
    let app = app(ConnectionState::Failed, ScriptedProvider::down());

    let (status, body) = get_json(&app.router, "/api/quotes?keys=NSE:NIFTY%20BANK,NSE:SBIN").await;

    assert_eq!(status, StatusCode::OK);
    let index = &body["quotes"]["NSE:NIFTY BANK"];
    assert_eq!(index["source"], "synthetic");
    assert_eq!(index["is_degraded"], true);
    assert!(index["degraded_reason"].as_str().unwrap().contains("upstream down"));
    assert!(body["quotes"]["NSE:SBIN"].is_object());
}

#[tokio::test]
async fn malformed_key_is_bad_request() {
    let app = app(ConnectionState::Subscribed, ScriptedProvider::priced(600));

    let (status, body) = get_json(&app.router, "/api/quotes?keys=SBIN").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("EXCHANGE:SYMBOL"));
}

#[tokio::test]
async fn unservable_key_is_service_unavailable() {
    let clock = manual_clock();
    let cache = common::cache(&clock);
    let registry = Arc::new(InstrumentRegistry::banknifty());
    let orchestrator = orchestrator_with(
        &registry,
        &cache,
        ScriptedProvider::down(),
        FixedStream::with_state(ConnectionState::Failed),
        orchestrator_config(),
        SyntheticConfig {
            default_price: None,
            ..SyntheticConfig::default()
        },
    );
    let router = router(Arc::new(AppState::new("test-0.0.1", orchestrator)));

    let (status, body) = get_json(&router, "/api/quotes?keys=NSE:BOGUS").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("NSE:BOGUS"));
}

// =============================================================================
// Status and Instruments
// =============================================================================

#[tokio::test]
async fn status_reports_last_served_source() {
    let app = app(ConnectionState::Reconnecting, ScriptedProvider::priced(600));

    let (_, before) = get_json(&app.router, "/api/status").await;
    assert!(before["active_source"].is_null());

    get_json(&app.router, "/api/quotes?keys=NSE:SBIN").await;
    let (status, after) = get_json(&app.router, "/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["active_source"], "direct");
    assert_eq!(after["connector_state"], "reconnecting");
    assert!(after["last_served_at"].is_string());
    assert_eq!(after["polling_active"], false);
}

#[tokio::test]
async fn instruments_list_the_basket() {
    let app = app(ConnectionState::Subscribed, ScriptedProvider::priced(600));

    let (status, body) = get_json(&app.router, "/api/instruments").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["index"]["key"], "NSE:NIFTY BANK");
    let constituents = body["constituents"].as_array().unwrap();
    assert_eq!(constituents.len(), 10);
    assert_eq!(constituents[0]["key"], "NSE:HDFCBANK");
}

// =============================================================================
// Control
// =============================================================================

#[tokio::test]
async fn stream_control_starts_and_stops() {
    let app = app(ConnectionState::Disconnected, ScriptedProvider::priced(600));

    let (status, body) = post_json(&app.router, "/api/stream/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connector_state"], "subscribed");
    assert_eq!(app.stream.starts(), 1);

    let (status, body) = post_json(&app.router, "/api/stream/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connector_state"], "disconnected");
}

#[tokio::test]
async fn unknown_stream_action_is_bad_request() {
    let app = app(ConnectionState::Disconnected, ScriptedProvider::priced(600));

    let (status, body) = post_json(&app.router, "/api/stream/restart").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("restart"));
    assert_eq!(app.stream.starts(), 0);
}

#[tokio::test]
async fn polling_control_sets_interval() {
    let app = app(ConnectionState::Subscribed, ScriptedProvider::priced(600));

    let (status, body) = post_json(&app.router, "/api/polling/start?interval_secs=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["interval_secs"], 7);

    let (_, body) = post_json(&app.router, "/api/polling/start").await;
    assert_eq!(body["interval_secs"], 7);

    let (status, body) = post_json(&app.router, "/api/polling/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);

    let (status, _) = post_json(&app.router, "/api/polling/pause").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = app(ConnectionState::Subscribed, ScriptedProvider::priced(600));

    let (status, _) = send(&app.router, "GET", "/api/orders").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
