//! Offline adapters, wired in when no Kite credentials are configured.
//!
//! Every quote call fails with a connection error and the stream never
//! leaves `Disconnected`, so reads resolve to stale cache or synthetic
//! quotes.

use async_trait::async_trait;

use crate::application::ports::{FetchError, QuoteProviderPort, StreamControlPort, UpstreamQuote};
use crate::domain::connection::ConnectionState;
use crate::domain::instrument::InstrumentKey;

/// Quote provider with no upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineQuoteProvider;

#[async_trait]
impl QuoteProviderPort for OfflineQuoteProvider {
    async fn fetch_quote(&self, key: &InstrumentKey) -> Result<UpstreamQuote, FetchError> {
        Err(FetchError::Connection(format!(
            "offline: no credentials configured for {key}"
        )))
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

/// Stream control with no ticker behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineStream;

#[async_trait]
impl StreamControlPort for OfflineStream {
    fn health(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }

    fn start(&self) {
        tracing::warn!("Stream start ignored: no Kite credentials configured");
    }

    async fn stop(&self) {}
}
