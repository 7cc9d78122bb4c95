//! Kite REST quote client.
//!
//! Direct per-instrument quote calls used by refills and the background
//! poll. Implements [`QuoteProviderPort`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::auth::KiteCredentials;
use super::messages::{ApiEnvelope, QuoteResponse};
use crate::application::ports::{FetchError, QuoteProviderPort, UpstreamQuote};
use crate::domain::instrument::InstrumentKey;

/// Default production REST root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.kite.trade";

const KITE_VERSION: &str = "3";

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct KiteRestConfig {
    /// REST root, without trailing slash.
    pub base_url: String,
    /// Client-side request timeout.
    pub timeout: Duration,
}

impl Default for KiteRestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_millis(1500),
        }
    }
}

/// Errors constructing the client.
#[derive(Debug, thiserror::Error)]
pub enum KiteRestError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Kite `/quote` client.
#[derive(Debug, Clone)]
pub struct KiteQuoteClient {
    client: reqwest::Client,
    credentials: KiteCredentials,
    base_url: String,
    timeout: Duration,
}

impl KiteQuoteClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &KiteRestConfig, credentials: KiteCredentials) -> Result<Self, KiteRestError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KiteRestError::Client(e.to_string()))?;

        Ok(Self {
            client,
            credentials,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    fn map_transport_error(&self, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if error.is_connect() {
            FetchError::Connection(error.to_string())
        } else {
            FetchError::Upstream(error.to_string())
        }
    }
}

#[async_trait]
impl QuoteProviderPort for KiteQuoteClient {
    async fn fetch_quote(&self, key: &InstrumentKey) -> Result<UpstreamQuote, FetchError> {
        let instrument = key.to_string();
        let url = format!("{}/quote", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("i", instrument.as_str())])
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.credentials.authorization_header())
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        if !status.is_success() {
            let envelope = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body).ok();
            return Err(map_api_error(status, envelope.as_ref()));
        }

        let response: QuoteResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Upstream(format!("invalid quote payload: {e}")))?;

        if !response.is_success() {
            return Err(map_api_error(status, Some(&response)));
        }

        response
            .data
            .and_then(|mut data| data.remove(&instrument))
            .map(super::messages::FullQuote::into_upstream)
            .ok_or_else(|| FetchError::UpstreamRejected(format!("no quote returned for {instrument}")))
    }

    fn name(&self) -> &'static str {
        "kite-rest"
    }
}

/// Map a Kite error response onto the fetch error taxonomy.
fn map_api_error<T>(status: StatusCode, envelope: Option<&ApiEnvelope<T>>) -> FetchError {
    let message = envelope
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| status.to_string());

    match envelope.and_then(|e| e.error_type.as_deref()) {
        Some("InputException") => return FetchError::UpstreamRejected(message),
        Some("TokenException" | "PermissionException") => {
            return FetchError::Connection(message);
        }
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Connection(message),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => FetchError::UpstreamRejected(message),
        _ => FetchError::Upstream(format!("{status}: {message}")),
    }
}
