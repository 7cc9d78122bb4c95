//! Domain Layer - Core quote types and business rules.
//!
//! This layer contains the value types shared by every actor in the
//! service. Nothing here performs I/O.

/// Wall-clock abstraction used for freshness decisions.
pub mod clock;

/// Stream connection lifecycle state machine.
pub mod connection;

/// Instrument keys and the static instrument registry.
pub mod instrument;

/// Quote value types and source tags.
pub mod quote;
