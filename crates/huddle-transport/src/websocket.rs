//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// A standalone WebSocket listener that performs the handshake itself.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept the next connection and complete its handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting or the handshake fails. A failed handshake
    /// only concerns that one peer; callers should keep accepting.
    pub async fn accept(&self) -> Result<WebSocketConnection<TcpStream>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = accept_async(stream).await.map_err(|e| {
            warn!(remote = %addr, "WebSocket handshake failed: {}", e);
            TransportError::Other(format!("WebSocket handshake failed: {}", e))
        })?;

        debug!("WebSocket handshake completed with {}", addr);

        Ok(WebSocketConnection::new(
            ws_stream,
            Some(addr),
            self.config.max_message_size,
        ))
    }
}

/// A WebSocket connection over any async byte stream.
pub struct WebSocketConnection<S> {
    id: ConnectionId,
    stream: WebSocketStream<S>,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established WebSocket stream.
    #[must_use]
    pub fn new(
        stream: WebSocketStream<S>,
        remote_addr: Option<SocketAddr>,
        max_message_size: usize,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            remote_addr,
            max_message_size,
        }
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.stream.split();
        let reader = WebSocketReader {
            id: self.id.clone(),
            stream,
            max_message_size: self.max_message_size,
        };
        let writer = WebSocketWriter {
            sink,
            closed: false,
        };
        (Box::new(reader), Box::new(writer))
    }
}

/// Read half of a [`WebSocketConnection`].
pub struct WebSocketReader<S> {
    id: ConnectionId,
    stream: SplitStream<WebSocketStream<S>>,
    max_message_size: usize,
}

#[async_trait]
impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let data = match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                Some(Ok(Message::Text(text))) => Bytes::from(text),
                // tungstenite queues the pong itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!(connection = %self.id, "Connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(connection = %self.id, "WebSocket error: {}", e);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            };

            if data.len() > self.max_message_size {
                warn!(
                    connection = %self.id,
                    "Message too large: {} bytes (max: {})",
                    data.len(),
                    self.max_message_size
                );
                return Err(TransportError::FrameTooLarge {
                    size: data.len(),
                    max: self.max_message_size,
                });
            }

            return Ok(Some(data));
        }
    }
}

/// Write half of a [`WebSocketConnection`].
pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    closed: bool,
}

#[async_trait]
impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        self.sink
            .send(to_ws_message(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }
}

/// UTF-8 payloads go out as text frames so browser clients can read them
/// directly; anything else is sent as binary.
fn to_ws_message(frame: Bytes) -> Message {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_utf8_frames_become_text() {
        assert!(matches!(
            to_ws_message(Bytes::from_static(b"hello")),
            Message::Text(t) if t == "hello"
        ));
        assert!(matches!(
            to_ws_message(Bytes::from_static(&[0xff, 0xfe])),
            Message::Binary(b) if b == vec![0xff, 0xfe]
        ));
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let transport = WebSocketTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
            ws.send(Message::Text("ping?".into())).await.unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            reply
        });

        let conn = transport.accept().await.unwrap();
        assert!(conn.remote_addr().is_some());
        let (mut reader, mut writer) = Box::new(conn).split();

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"ping?");

        writer
            .write_frame(Bytes::from_static(b"pong!"))
            .await
            .unwrap();

        let reply = client.await.unwrap();
        assert_eq!(reply, Message::Text("pong!".into()));

        assert!(reader.read_frame().await.unwrap().is_none());
        // the peer may already be gone; only the second call is guaranteed quiet
        let _ = writer.close().await;
        assert!(writer.close().await.is_ok());
        assert!(matches!(
            writer.write_frame(Bytes::from_static(b"late")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let transport = WebSocketTransport::new(WebSocketConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_message_size: 4,
        })
        .await
        .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
            ws.send(Message::Binary(vec![0u8; 16])).await.unwrap();
            ws
        });

        let conn = transport.accept().await.unwrap();
        let (mut reader, _writer) = Box::new(conn).split();
        let result = reader.read_frame().await;
        assert!(matches!(
            result,
            Err(TransportError::FrameTooLarge { size: 16, max: 4 })
        ));
        drop(client.await.unwrap());
    }
}
