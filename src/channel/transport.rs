//! WebSocket Transport Layer
//!
//! Single responsibility: open a WebSocket and yield its text frames.
//! No knowledge of event routing, leases or reconnection.
//!
//! The channel talks to the network only through [`Connector`] and
//! [`Transport`], so tests can substitute an in-memory implementation.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{LiveError, Result};

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `url`. Resolves once the transport is open.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// An open, receive-only event transport.
#[async_trait]
pub trait Transport: Send {
    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the transport.
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Close the transport from our side.
    async fn close(&mut self) -> Result<()>;
}

/// [`Connector`] backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        Ok(Box::new(WsTransport::connect(url).await?))
    }
}

/// A connected WebSocket.
///
/// Can only be constructed via `WsTransport::connect()`.
pub struct WsTransport {
    sink: WsSink,
    stream: WsStream,
}

impl WsTransport {
    /// Connect to a WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        debug!(endpoint = %redact_query(url), "Connecting to WebSocket");

        let request = url
            .into_client_request()
            .map_err(|e| LiveError::Transport(format!("Invalid WebSocket request: {}", e)))?;

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| LiveError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(endpoint = %redact_query(url), "WebSocket connected");
        Ok(Self { sink, stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    // Handed on as-is; non-UTF-8 payloads fail to parse and are dropped later
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue, // Ping/pong handled by tungstenite
                Some(Err(e)) => {
                    return Err(LiveError::Transport(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| LiveError::Transport(format!("Failed to send close: {}", e)))?;
        self.sink
            .close()
            .await
            .map_err(|e| LiveError::Transport(format!("Failed to close: {}", e)))
    }
}

/// Strip the query string so tokens never reach the logs.
pub(crate) fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_query() {
        assert_eq!(redact_query("ws://console:8080/ws?token=abc"), "ws://console:8080/ws");
        assert_eq!(redact_query("wss://console/ws"), "wss://console/ws");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is essentially never listening on loopback
        let result = WsConnector.connect("ws://127.0.0.1:9/ws?token=abc").await;
        assert!(matches!(result, Err(LiveError::Transport(_))));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = WsConnector.connect("not a url").await;
        assert!(matches!(result, Err(LiveError::Transport(_))));
    }
}
