//! Minimal WebSocket client for end-to-end tests.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use table_server::protocol::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A connected client.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Connect to `ws://{addr}/ws`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let (stream, _response) = connect_async(format!("ws://{addr}/ws"))
            .await
            .with_context(|| format!("connecting to {addr}"))?;
        Ok(Self { stream })
    }

    /// Next server message, skipping control frames.
    pub async fn recv(&mut self, timeout: Duration) -> Result<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(timeout, self.stream.next())
                .await
                .map_err(|_| anyhow!("no message within {timeout:?}"))?
                .ok_or_else(|| anyhow!("connection closed"))??;

            match frame {
                Message::Text(text) => {
                    return serde_json::from_str(&text)
                        .with_context(|| format!("decoding server message {text}"));
                }
                Message::Close(_) => bail!("connection closed by server"),
                _ => continue,
            }
        }
    }

    /// Receive until `predicate` matches, returning the matching message.
    pub async fn recv_until<F>(&mut self, timeout: Duration, mut predicate: F) -> Result<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let message = self.recv(remaining).await?;
            if predicate(&message) {
                return Ok(message);
            }
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Send a close frame and wait for the server to finish the handshake.
    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        while let Some(frame) = self.stream.next().await {
            if frame.is_err() {
                break;
            }
        }
        Ok(())
    }
}
