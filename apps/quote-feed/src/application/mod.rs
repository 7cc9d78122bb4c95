//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the quote-acquisition services and the port
//! interfaces that upstream adapters implement.

/// Port interfaces for upstream quote providers and the stream connector.
pub mod ports;

/// Cache, fetcher, orchestrator, synthetic generator and status services.
pub mod services;
