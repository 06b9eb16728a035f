//! Connected clients and their pump pair.
//!
//! Every client runs two pumps. The [`ReadPump`] turns inbound frames into
//! broadcasts; the [`WritePump`] drains the client's mailbox onto the
//! transport. The room closes the mailbox to stop the write pump, and the read
//! pump leaves the room on every exit path through its [`LeaveGuard`].

use huddle_transport::{Connection, FrameReader, FrameWriter};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::identity::Identity;
use crate::message::Message;
use crate::room::{MailboxReceiver, MailboxSender, RoomError, RoomHandle};

static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocate a fresh ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the ID.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// One participant, before its pumps start.
pub struct Client {
    id: ClientId,
    identity: Option<Arc<Identity>>,
    room: RoomHandle,
    mailbox: MailboxReceiver,
    // handed to the room on join; the room then holds the only sender
    outbox: Option<MailboxSender>,
}

impl Client {
    /// Create a client with a fresh mailbox of `mailbox_capacity` slots.
    #[must_use]
    pub fn new(room: RoomHandle, identity: Option<Identity>, mailbox_capacity: usize) -> Self {
        let (outbox, mailbox) = mpsc::channel(mailbox_capacity.max(1));
        Self {
            id: ClientId::generate(),
            identity: identity.map(Arc::new),
            room,
            mailbox,
            outbox: Some(outbox),
        }
    }

    /// Client ID.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Identity supplied at construction.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    /// Register with the room.
    ///
    /// The returned guard asks the room to remove the client when dropped.
    ///
    /// # Errors
    ///
    /// Fails if the room is closed or this client already joined.
    pub async fn join(&mut self) -> Result<LeaveGuard, RoomError> {
        let outbox = self
            .outbox
            .take()
            .ok_or(RoomError::AlreadyJoined(self.id))?;
        self.room
            .join(self.id, self.identity.clone(), outbox)
            .await?;
        Ok(LeaveGuard::new(self.room.clone(), self.id))
    }

    /// Attach a transport and build the two pumps.
    #[must_use]
    pub fn into_pumps(self, conn: Box<dyn Connection>, guard: LeaveGuard) -> (ReadPump, WritePump) {
        let (reader, writer) = conn.split();
        let read = ReadPump {
            client: self.id,
            identity: self.identity,
            room: self.room,
            reader,
            guard,
        };
        let write = WritePump {
            client: self.id,
            writer,
            mailbox: self.mailbox,
        };
        (read, write)
    }
}

/// Requests `leave` exactly once, when released or dropped.
pub struct LeaveGuard {
    room: RoomHandle,
    client: Option<ClientId>,
}

impl LeaveGuard {
    /// Guard `client`'s membership in `room`.
    #[must_use]
    pub fn new(room: RoomHandle, client: ClientId) -> Self {
        Self {
            room,
            client: Some(client),
        }
    }

    /// Leave now instead of on drop.
    pub fn release(mut self) {
        self.leave();
    }

    fn leave(&mut self) {
        if let Some(client) = self.client.take() {
            self.room.leave(client);
        }
    }
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Moves inbound frames from the transport to the room.
pub struct ReadPump {
    client: ClientId,
    identity: Option<Arc<Identity>>,
    room: RoomHandle,
    reader: Box<dyn FrameReader>,
    guard: LeaveGuard,
}

impl ReadPump {
    /// Pump until the transport closes or fails, then leave the room.
    ///
    /// Returns the number of frames read.
    pub async fn run(mut self) -> u64 {
        let mut frames = 0;

        loop {
            match self.reader.read_frame().await {
                Ok(Some(payload)) => {
                    frames += 1;
                    let mut message = Message::new(payload).with_sender(self.client);
                    if let Some(identity) = &self.identity {
                        message = message.with_identity(Arc::clone(identity));
                    }
                    if self.room.broadcast(message).await.is_err() {
                        debug!(client = %self.client, "Room closed, stopping read pump");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(client = %self.client, "Transport closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(client = %self.client, error = %e, "Transport read failed");
                    break;
                }
            }
        }

        self.guard.release();
        frames
    }
}

/// Moves messages from the client's mailbox to the transport.
pub struct WritePump {
    client: ClientId,
    writer: Box<dyn FrameWriter>,
    mailbox: MailboxReceiver,
}

impl WritePump {
    /// Pump until the mailbox is closed and drained or a write fails, then
    /// close the transport's write side.
    ///
    /// Returns the number of frames written.
    pub async fn run(mut self) -> u64 {
        let mut frames = 0;

        while let Some(message) = self.mailbox.recv().await {
            if let Err(e) = self.writer.write_frame(message.payload().clone()).await {
                warn!(client = %self.client, error = %e, "Transport write failed");
                // the room evicts a client whose mailbox is closed
                self.mailbox.close();
                break;
            }
            frames += 1;
        }

        if let Err(e) = self.writer.close().await {
            debug!(client = %self.client, error = %e, "Transport close failed");
        }
        debug!(client = %self.client, frames, "Write pump stopped");
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{Room, RoomConfig};
    use crate::trace::off;
    use huddle_transport::memory;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("client-"));
    }

    #[tokio::test]
    async fn test_join_twice_is_rejected() {
        let (room, _task) = Room::spawn(RoomConfig::default(), off());
        let mut client = Client::new(room.clone(), None, 4);

        let guard = client.join().await.unwrap();
        assert_eq!(
            client.join().await.err(),
            Some(RoomError::AlreadyJoined(client.id()))
        );
        assert_eq!(room.stats().await.unwrap().members, vec![client.id()]);
        drop(guard);
    }

    #[tokio::test]
    async fn test_dropping_guard_leaves_room() {
        let (room, _task) = Room::spawn(RoomConfig::default(), off());
        let mut client = Client::new(room.clone(), None, 4);
        let guard = client.join().await.unwrap();
        let (read, write) = client.into_pumps(Box::new(memory::pair().0), guard);

        // dropping the read pump drops its guard
        drop(read);
        timeout(WAIT, write.run()).await.unwrap();
        assert!(room.stats().await.unwrap().members.is_empty());
    }

    #[tokio::test]
    async fn test_read_pump_tags_and_leaves() {
        let (room, _task) = Room::spawn(RoomConfig::default(), off());
        let (watch_tx, mut watch_rx) = mpsc::channel(8);
        room.join(ClientId::generate(), None, watch_tx).await.unwrap();

        let fields = serde_json::json!({"name": "Ana"})
            .as_object()
            .cloned()
            .unwrap();
        let mut sender = Client::new(room.clone(), Some(Identity::new(fields)), 8);
        let sender_id = sender.id();
        assert_eq!(sender.identity().and_then(Identity::name), Some("Ana"));

        let guard = sender.join().await.unwrap();
        let (conn, mut peer) = memory::pair();
        let (read, write) = sender.into_pumps(Box::new(conn), guard);
        let writer = tokio::spawn(write.run());

        peer.send("hi");
        peer.hang_up();
        assert_eq!(timeout(WAIT, read.run()).await.unwrap(), 1);

        let seen = timeout(WAIT, watch_rx.recv()).await.unwrap().unwrap();
        assert_eq!(seen.payload(), "hi");
        assert_eq!(seen.sender(), Some(sender_id));
        assert_eq!(seen.identity().and_then(Identity::name), Some("Ana"));

        // leaving closed the mailbox, so the write pump finishes and closes
        timeout(WAIT, writer).await.unwrap().unwrap();
        assert!(peer.is_closed());
        assert!(!room.stats().await.unwrap().is_member(sender_id));
    }

    #[tokio::test]
    async fn test_write_failure_leads_to_eviction() {
        let (room, _task) = Room::spawn(RoomConfig::default(), off());
        let (watch_tx, mut watch_rx) = mpsc::channel(8);
        room.join(ClientId::generate(), None, watch_tx).await.unwrap();

        let mut client = Client::new(room.clone(), None, 8);
        let id = client.id();
        let guard = client.join().await.unwrap();
        let (conn, peer) = memory::pair();
        let (_read, write) = client.into_pumps(Box::new(conn), guard);

        peer.fail_writes();
        let writer = tokio::spawn(write.run());

        room.broadcast(Message::new("one")).await.unwrap();
        assert_eq!(timeout(WAIT, writer).await.unwrap().unwrap(), 0);
        assert!(peer.is_closed());

        room.broadcast(Message::new("two")).await.unwrap();
        timeout(WAIT, watch_rx.recv()).await.unwrap().unwrap();
        timeout(WAIT, watch_rx.recv()).await.unwrap().unwrap();

        let stats = room.stats().await.unwrap();
        assert!(!stats.is_member(id));
        assert_eq!(stats.evictions, 1);
    }
}
