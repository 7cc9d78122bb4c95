//! Kite Ticker Transport
//!
//! WebSocket session against the Kite ticker. The connector only sees the
//! [`TickTransport`] / [`TickSession`] seam, so its lifecycle can be driven by
//! scripted sessions in tests.
//!
//! # Stream URL
//!
//! `wss://ws.kite.trade?api_key=...&access_token=...`
//!
//! # Protocol
//!
//! - Client sends JSON text: `{"a":"subscribe","v":[tokens]}` then
//!   `{"a":"mode","v":["quote",[tokens]]}`.
//! - Server sends binary tick frames (see the codec), 1-byte heartbeats
//!   roughly every second, and occasional JSON text notices.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::auth::KiteCredentials;
use super::codec::{TickFrame, decode_frame};
use super::messages::{StreamMode, TickerEvent, TickerRequest};
use crate::application::ports::ConnectionError;

/// Default production ticker endpoint.
pub const DEFAULT_TICKER_URL: &str = "wss://ws.kite.trade";

// =============================================================================
// Transport Seam
// =============================================================================

/// Opens ticker sessions.
#[async_trait]
pub trait TickTransport: Send + Sync + 'static {
    /// Open a socket. Completes once the WebSocket handshake succeeds.
    async fn connect(&self) -> Result<Box<dyn TickSession>, ConnectionError>;
}

/// One open ticker socket.
#[async_trait]
pub trait TickSession: Send {
    /// Request ticks for `tokens`.
    async fn subscribe(&mut self, tokens: &[u32]) -> Result<(), ConnectionError>;

    /// Next decoded frame. `None` once the socket has ended.
    async fn next_frame(&mut self) -> Option<Result<TickFrame, ConnectionError>>;
}

// =============================================================================
// WebSocket Implementation
// =============================================================================

/// Ticker transport over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct KiteTicker {
    url: String,
    credentials: KiteCredentials,
    mode: StreamMode,
}

impl KiteTicker {
    /// Create a transport for `url` (without credentials).
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: KiteCredentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            mode: StreamMode::Quote,
        }
    }

    /// Override the requested tick detail level.
    #[must_use]
    pub const fn with_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    /// Endpoint without credentials, for logs.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TickTransport for KiteTicker {
    async fn connect(&self) -> Result<Box<dyn TickSession>, ConnectionError> {
        tracing::info!(url = %self.url, "Connecting to Kite ticker");

        let url = self.credentials.ticker_url(&self.url);
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(map_handshake_error)?;

        Ok(Box::new(KiteTickerSession {
            stream,
            mode: self.mode,
        }))
    }
}

fn map_handshake_error(error: tungstenite::Error) -> ConnectionError {
    match error {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            ConnectionError::Auth(format!("ticker refused credentials ({})", response.status()))
        }
        other => ConnectionError::Handshake(other.to_string()),
    }
}

struct KiteTickerSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mode: StreamMode,
}

impl KiteTickerSession {
    async fn send(&mut self, request: &TickerRequest) -> Result<(), ConnectionError> {
        let json = request
            .to_json()
            .map_err(|e| ConnectionError::Protocol(format!("failed to serialize request: {e}")))?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ConnectionError::Socket(format!("failed to send request: {e}")))
    }
}

#[async_trait]
impl TickSession for KiteTickerSession {
    async fn subscribe(&mut self, tokens: &[u32]) -> Result<(), ConnectionError> {
        tracing::debug!(tokens = tokens.len(), mode = ?self.mode, "Sending subscribe request");
        self.send(&TickerRequest::Subscribe(tokens.to_vec())).await?;
        self.send(&TickerRequest::Mode(self.mode, tokens.to_vec()))
            .await
    }

    async fn next_frame(&mut self) -> Option<Result<TickFrame, ConnectionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => {
                    return Some(
                        decode_frame(&data).map_err(|e| ConnectionError::Protocol(e.to_string())),
                    );
                }
                Ok(Message::Text(text)) => log_text_event(&text),
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(ConnectionError::Socket(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "Ticker sent close frame");
                    return Some(Err(ConnectionError::Closed));
                }
                Ok(Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(ConnectionError::Socket(e.to_string()))),
            }
        }
    }
}

fn log_text_event(text: &str) {
    match serde_json::from_str::<TickerEvent>(text) {
        Ok(TickerEvent::Error(data)) => tracing::warn!(%data, "Ticker error notice"),
        Ok(TickerEvent::Message(data)) => tracing::info!(%data, "Ticker message"),
        Ok(TickerEvent::Order(_)) => tracing::trace!("Ignoring order postback"),
        Err(e) => tracing::debug!(error = %e, "Unrecognized ticker text message"),
    }
}
