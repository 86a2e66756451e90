//! Transport seam between the connection driver and the network.
//!
//! DESIGN
//! ======
//! The driver only needs to send text, receive text, and close. `Connector`
//! opens a fresh `Transport` per connection attempt, so reconnects go through
//! the same path as the first connect. `WsConnector` is the production
//! implementation over `tokio-tungstenite`; tests script their own.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// Path of the relay's WebSocket endpoint.
pub const SOCKET_PATH: &str = "/api/ws";

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket connect failed: {0}")]
    Connect(Box<tungstenite::Error>),
    #[error("websocket send failed: {0}")]
    Send(Box<tungstenite::Error>),
    #[error("websocket receive failed: {0}")]
    Receive(Box<tungstenite::Error>),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

// =============================================================================
// TRAITS
// =============================================================================

/// One open, bidirectional text connection.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), ClientError>;

    /// Next inbound text frame. `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, ClientError>>;

    async fn close(&mut self) -> Result<(), ClientError>;
}

/// Opens transports against a server URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError>;
}

// =============================================================================
// WEBSOCKET IMPLEMENTATION
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError> {
        let socket_url = socket_url(url);
        debug!(%socket_url, "chat: opening websocket");
        let (stream, _response) = connect_async(socket_url.as_str())
            .await
            .map_err(|e| ClientError::Connect(Box::new(e)))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Send(Box::new(e)))
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite; binary frames are not part of the protocol.
                Ok(_) => {}
                Err(e) => return Some(Err(ClientError::Receive(Box::new(e)))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(ClientError::Send(Box::new(e))),
        }
    }
}

/// Map a server base URL onto its WebSocket endpoint.
///
/// `http`/`https` become `ws`/`wss`; the socket path is appended unless the
/// URL already ends with it.
#[must_use]
pub fn socket_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let mapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_owned()
    } else {
        format!("ws://{base}")
    };

    if mapped.ends_with(SOCKET_PATH) { mapped } else { format!("{mapped}{SOCKET_PATH}") }
}
