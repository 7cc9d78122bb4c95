//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Kite Connect adapters (REST quotes, ticker stream, stream connector).
pub mod kite;

/// Configuration loaded from the environment.
pub mod config;

/// HTTP API, health and metrics endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
