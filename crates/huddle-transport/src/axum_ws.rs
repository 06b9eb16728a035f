//! Frame connection over an axum-upgraded WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// A connection produced by axum's `WebSocketUpgrade`.
pub struct AxumConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl AxumConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(
        socket: WebSocket,
        remote_addr: Option<SocketAddr>,
        max_message_size: usize,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            remote_addr,
            max_message_size,
        }
    }
}

impl Connection for AxumConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(AxumReader {
                id: self.id,
                stream,
                max_message_size: self.max_message_size,
            }),
            Box::new(AxumWriter {
                sink,
                closed: false,
            }),
        )
    }
}

struct AxumReader {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl FrameReader for AxumReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let data = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Bytes::from(text),
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection = %self.id, "WebSocket closed by peer");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            };

            if data.len() > self.max_message_size {
                return Err(TransportError::FrameTooLarge {
                    size: data.len(),
                    max: self.max_message_size,
                });
            }
            return Ok(Some(data));
        }
    }
}

struct AxumWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for AxumWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        // axum reports an already-closed peer as an error; nothing is left to release
        if let Err(e) = self.sink.close().await {
            debug!("WebSocket close after peer hangup: {}", e);
        }
        Ok(())
    }
}
