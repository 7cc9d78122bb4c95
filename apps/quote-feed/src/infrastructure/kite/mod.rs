//! Kite Connect Adapters
//!
//! Upstream integrations for Zerodha Kite:
//!
//! - **REST**: per-instrument `/quote` calls (direct and poll refills)
//! - **Ticker**: WebSocket stream of binary tick frames
//! - **Connector**: ticker lifecycle state machine writing into the cache
//! - **Offline**: stand-ins used when no credentials are configured

pub mod auth;
pub mod codec;
pub mod connector;
pub mod messages;
pub mod offline;
pub mod reconnect;
pub mod rest;
pub mod ticker;
pub mod watchdog;

pub use auth::{CredentialsError, KiteCredentials};
pub use codec::{CodecError, PacketKind, Tick, TickFrame, decode_frame};
pub use connector::{StreamConnector, StreamConnectorConfig};
pub use messages::{StreamMode, TickerEvent, TickerRequest};
pub use offline::{OfflineQuoteProvider, OfflineStream};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{DEFAULT_API_BASE_URL, KiteQuoteClient, KiteRestConfig, KiteRestError};
pub use ticker::{DEFAULT_TICKER_URL, KiteTicker, TickSession, TickTransport};
pub use watchdog::TickWatchdog;
