//! Connection acceptor.
//!
//! Turns an already-upgraded transport into a registered client and drives it
//! until disconnect.

use huddle_transport::{Connection, ConnectionId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{Client, ClientId};
use crate::identity::Identity;
use crate::room::{RoomError, RoomHandle};

/// Default mailbox capacity per client.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Acceptor errors.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The client could not be admitted.
    #[error("Admission failed: {0}")]
    Room(#[from] RoomError),
}

/// Acceptor configuration.
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Mailbox slots per client.
    pub mailbox_capacity: usize,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// Outcome of a finished connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// The client that served the connection.
    pub client: ClientId,
    /// Transport-level connection ID.
    pub connection: ConnectionId,
    /// Frames read from the transport.
    pub frames_read: u64,
    /// Frames written to the transport.
    pub frames_written: u64,
}

/// Admits connections into a room.
#[derive(Clone)]
pub struct Acceptor {
    room: RoomHandle,
    config: AcceptorConfig,
}

impl Acceptor {
    /// Create an acceptor for `room`.
    #[must_use]
    pub fn new(room: RoomHandle, config: AcceptorConfig) -> Self {
        Self { room, config }
    }

    /// The room connections are admitted to.
    #[must_use]
    pub fn room(&self) -> &RoomHandle {
        &self.room
    }

    /// Serve one connection until it disconnects.
    ///
    /// Joins the room, starts the write pump on its own task and runs the read
    /// pump on the caller's task. Returns after the read pump has left the room
    /// and the write pump has closed the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the room cannot admit the client. The transport is
    /// dropped unused in that case.
    pub async fn serve(
        &self,
        conn: Box<dyn Connection>,
        identity: Option<Identity>,
    ) -> Result<SessionSummary, AcceptError> {
        let connection = conn.id().clone();
        let mut client = Client::new(self.room.clone(), identity, self.config.mailbox_capacity);
        let client_id = client.id();

        let guard = client.join().await?;
        debug!(
            client = %client_id,
            connection = %connection,
            remote = conn.remote_addr().as_deref().unwrap_or("unknown"),
            "Client admitted"
        );

        let (read_pump, write_pump) = client.into_pumps(conn, guard);
        let writer = tokio::spawn(write_pump.run());
        let frames_read = read_pump.run().await;

        let frames_written = match writer.await {
            Ok(frames) => frames,
            Err(e) => {
                warn!(client = %client_id, error = %e, "Write pump aborted");
                0
            }
        };

        debug!(
            client = %client_id,
            frames_read,
            frames_written,
            "Client disconnected"
        );

        Ok(SessionSummary {
            client: client_id,
            connection,
            frames_read,
            frames_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{Room, RoomConfig};
    use crate::trace::{off, MemoryTracer, Tracer};
    use huddle_transport::memory::{self, MemoryPeer};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn setup(config: RoomConfig, tracer: Arc<dyn Tracer>, mailbox: usize) -> Acceptor {
        let (room, _task) = Room::spawn(config, tracer);
        Acceptor::new(
            room,
            AcceptorConfig {
                mailbox_capacity: mailbox,
            },
        )
    }

    /// Connect a client and wait until the room has admitted it.
    async fn connect(
        acceptor: &Acceptor,
        name: &str,
    ) -> (MemoryPeer, JoinHandle<Result<SessionSummary, AcceptError>>) {
        let before = acceptor.room().stats().await.unwrap().member_count();
        let (conn, peer) = memory::pair_with_id(name);
        let task = {
            let acceptor = acceptor.clone();
            tokio::spawn(async move { acceptor.serve(Box::new(conn), None).await })
        };
        for _ in 0..100 {
            if acceptor.room().stats().await.unwrap().member_count() > before {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        (peer, task)
    }

    async fn recv(peer: &mut MemoryPeer) -> Option<bytes::Bytes> {
        timeout(WAIT, peer.recv()).await.expect("peer timed out")
    }

    #[tokio::test]
    async fn test_clean_close_tears_everything_down() {
        let acceptor = setup(RoomConfig::default(), off(), 8);
        let (mut peer, task) = connect(&acceptor, "solo").await;

        assert!(peer.send("hello"));
        assert_eq!(recv(&mut peer).await.unwrap(), "hello");

        peer.hang_up();
        let summary = timeout(WAIT, task).await.unwrap().unwrap().unwrap();

        assert_eq!(summary.connection.as_str(), "solo");
        assert_eq!(summary.frames_read, 1);
        assert_eq!(summary.frames_written, 1);
        assert!(peer.is_closed());
        assert!(recv(&mut peer).await.is_none());
        assert_eq!(acceptor.room().stats().await.unwrap().member_count(), 0);
    }

    #[tokio::test]
    async fn test_read_error_leaves_room() {
        let acceptor = setup(RoomConfig::default(), off(), 8);
        let (peer, task) = connect(&acceptor, "flaky").await;

        peer.fail_read("connection reset");
        let summary = timeout(WAIT, task).await.unwrap().unwrap().unwrap();

        assert_eq!(summary.frames_read, 0);
        assert!(peer.is_closed());
        let stats = acceptor.room().stats().await.unwrap();
        assert!(!stats.is_member(summary.client));
    }

    #[tokio::test]
    async fn test_hello_scenario_echo_off() {
        let config = RoomConfig {
            echo_to_sender: false,
            ..Default::default()
        };
        let acceptor = setup(config, off(), 2);
        let (mut a, _a_task) = connect(&acceptor, "a").await;
        let (mut b, _b_task) = connect(&acceptor, "b").await;

        a.send("hello");
        assert_eq!(recv(&mut b).await.unwrap(), "hello");

        // a second message proves the first was never echoed to a
        a.send("again");
        assert_eq!(recv(&mut b).await.unwrap(), "again");
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_hello_scenario_echo_on() {
        let acceptor = setup(RoomConfig::default(), off(), 2);
        let (mut a, _a_task) = connect(&acceptor, "a").await;
        let (mut b, _b_task) = connect(&acceptor, "b").await;

        a.send("hello");
        assert_eq!(recv(&mut b).await.unwrap(), "hello");
        assert_eq!(recv(&mut a).await.unwrap(), "hello");
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stalled_writer_is_evicted_sender_unaffected() {
        let config = RoomConfig {
            echo_to_sender: false,
            ..Default::default()
        };
        let acceptor = setup(config, off(), 8);
        let room = acceptor.room().clone();

        // b's mailbox is filled directly so no write pump can drain it
        let (b_tx, mut b_rx) = tokio::sync::mpsc::channel(2);
        let b = ClientId::generate();
        room.join(b, None, b_tx).await.unwrap();

        let (mut a, a_task) = connect(&acceptor, "a").await;
        let (mut watcher, _w_task) = connect(&acceptor, "watcher").await;

        for i in 0..3 {
            a.send(format!("m{i}"));
        }
        for i in 0..3 {
            assert_eq!(recv(&mut watcher).await.unwrap(), format!("m{i}").as_str());
        }

        let stats = room.stats().await.unwrap();
        assert!(!stats.is_member(b));
        assert_eq!(stats.evictions, 1);
        assert_eq!(b_rx.recv().await.unwrap().payload(), "m0");
        assert_eq!(b_rx.recv().await.unwrap().payload(), "m1");
        assert!(b_rx.recv().await.is_none());

        // a is still connected and still heard
        a.send("after");
        assert_eq!(recv(&mut watcher).await.unwrap(), "after");
        assert!(!a_task.is_finished());
        a.hang_up();
        assert_eq!(timeout(WAIT, a_task).await.unwrap().unwrap().unwrap().frames_read, 4);
    }

    #[tokio::test]
    async fn test_instrumented_variant_traces() {
        let tracer = Arc::new(MemoryTracer::new());
        let acceptor = setup(RoomConfig::default(), tracer.clone(), 8);
        let (mut peer, task) = connect(&acceptor, "traced").await;

        peer.send("ping");
        recv(&mut peer).await.unwrap();
        peer.hang_up();
        timeout(WAIT, task).await.unwrap().unwrap().unwrap();

        assert!(tracer.contains("New client joined"));
        assert!(tracer.contains("Message received: ping"));
        assert!(tracer.contains(" -- sent to client"));
        assert!(tracer.contains("Client left"));
    }

    #[tokio::test]
    async fn test_closed_room_rejects_connection() {
        let (room, handle) = Room::new(RoomConfig::default(), off());
        drop(room);
        let acceptor = Acceptor::new(handle, AcceptorConfig::default());

        let (conn, _peer) = memory::pair();
        let result = acceptor.serve(Box::new(conn), None).await;
        assert!(matches!(result, Err(AcceptError::Room(RoomError::Closed))));
    }
}
