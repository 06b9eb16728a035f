//! In-process transport backed by tokio channels.
//!
//! [`pair`] returns a [`MemoryConnection`] to hand to the room and a
//! [`MemoryPeer`] that plays the remote client: it injects inbound frames,
//! observes written frames and can simulate transport failures.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

enum Inbound {
    Frame(Bytes),
    Fail(String),
}

#[derive(Default)]
struct Shared {
    write_closed: AtomicBool,
    fail_writes: AtomicBool,
}

/// Create a connected (connection, peer) pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    pair_with_id(ConnectionId::generate())
}

/// Create a connected pair with a fixed connection ID.
#[must_use]
pub fn pair_with_id(id: impl Into<ConnectionId>) -> (MemoryConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());

    let conn = MemoryConnection {
        id: id.into(),
        inbound: inbound_rx,
        outbound: outbound_tx,
        shared: Arc::clone(&shared),
    };
    let peer = MemoryPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        shared,
    };
    (conn, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
}

impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (
            Box::new(MemoryReader {
                inbound: self.inbound,
            }),
            Box::new(MemoryWriter {
                outbound: Some(self.outbound),
                shared: self.shared,
            }),
        )
    }
}

struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

struct MemoryWriter {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("simulated write failure".into()));
        }
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.outbound.take().is_some() {
            self.shared.write_closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Remote end of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Shared>,
}

impl MemoryPeer {
    /// Deliver a frame to the server side. Returns `false` once the peer hung up
    /// or the reader is gone.
    pub fn send(&self, frame: impl Into<Bytes>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(Inbound::Frame(frame.into())).is_ok())
    }

    /// Make the server's next read fail with a transport error.
    pub fn fail_read(&self, reason: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Inbound::Fail(reason.into()));
        }
    }

    /// Make every subsequent server write fail.
    pub fn fail_writes(&self) {
        self.shared.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Close the inbound direction, as a client closing its socket would.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next frame the server wrote. `None` once the server closed
    /// its write side and every frame has been drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Take a written frame without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Whether the server closed its write side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.write_closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_frames_reach_reader() {
        let (conn, mut peer) = pair_with_id("mem-1");
        assert_eq!(conn.id().as_str(), "mem-1");
        let (mut reader, _writer) = Box::new(conn).split();

        assert!(peer.send("hello"));
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), "hello");

        peer.hang_up();
        assert!(reader.read_frame().await.unwrap().is_none());
        assert!(!peer.send("late"));
    }

    #[tokio::test]
    async fn test_writer_close_is_observed_once() {
        let (conn, mut peer) = pair();
        let (_reader, mut writer) = Box::new(conn).split();

        writer.write_frame(Bytes::from_static(b"a")).await.unwrap();
        assert!(!peer.is_closed());
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        assert!(peer.is_closed());
        assert_eq!(peer.recv().await.unwrap(), "a");
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            writer.write_frame(Bytes::from_static(b"b")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_simulated_failures() {
        let (conn, peer) = pair();
        let (mut reader, mut writer) = Box::new(conn).split();

        peer.fail_read("boom");
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::ReceiveFailed(r)) if r == "boom"
        ));

        peer.fail_writes();
        assert!(writer.write_frame(Bytes::from_static(b"x")).await.is_err());
    }
}
