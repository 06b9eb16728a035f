//! The room hub.
//!
//! A [`Room`] owns the client registry and runs a single control loop that
//! takes join requests, leave requests and messages to broadcast one at a
//! time. Nothing outside the loop touches the registry, so it needs no lock.
//! Everyone else talks to the room through a cloneable [`RoomHandle`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::ClientId;
use crate::identity::Identity;
use crate::message::{Message, MessageId};
use crate::trace::{EvictionReason, TraceEvent, Tracer};

/// Sending half of a client mailbox, held by the room.
pub type MailboxSender = mpsc::Sender<Arc<Message>>;

/// Receiving half of a client mailbox, drained by the write pump.
pub type MailboxReceiver = mpsc::Receiver<Arc<Message>>;

/// Room errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    /// The control loop is no longer running.
    #[error("Room is closed")]
    Closed,

    /// The client already handed its mailbox to the room.
    #[error("Client {0} already joined")]
    AlreadyJoined(ClientId),
}

/// What to do when a recipient's mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Evict the client and close its mailbox.
    #[default]
    Evict,
    /// Wait for the client to make room. A stalled client stalls the room.
    Block,
}

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Capacity of the inbound broadcast queue.
    pub forward_capacity: usize,
    /// Capacity of the join queue.
    pub join_capacity: usize,
    /// Whether the sender's own mailbox receives its message.
    pub echo_to_sender: bool,
    /// Full-mailbox policy.
    pub overflow: OverflowPolicy,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            forward_capacity: 1024,
            join_capacity: 64,
            echo_to_sender: true,
            overflow: OverflowPolicy::Evict,
        }
    }
}

/// Snapshot of the room taken between two events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    /// Registered clients, sorted.
    pub members: Vec<ClientId>,
    /// Messages taken from the broadcast queue.
    pub messages_broadcast: u64,
    /// Messages placed in a mailbox.
    pub deliveries: u64,
    /// Clients removed by the delivery policy.
    pub evictions: u64,
}

impl RoomStats {
    /// Number of registered clients.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether `client` is registered.
    #[must_use]
    pub fn is_member(&self, client: ClientId) -> bool {
        self.members.binary_search(&client).is_ok()
    }
}

struct JoinRequest {
    client: ClientId,
    identity: Option<Arc<Identity>>,
    mailbox: MailboxSender,
    admitted: oneshot::Sender<()>,
}

/// Cloneable access to a running room.
#[derive(Clone)]
pub struct RoomHandle {
    join_tx: mpsc::Sender<JoinRequest>,
    leave_tx: mpsc::UnboundedSender<ClientId>,
    forward_tx: mpsc::Sender<Message>,
    stats_tx: mpsc::Sender<oneshot::Sender<RoomStats>>,
}

impl RoomHandle {
    /// Ask the room to admit `client` with the given mailbox.
    ///
    /// Resolves once the control loop has registered the client.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Closed`] if the room is not running.
    pub async fn join(
        &self,
        client: ClientId,
        identity: Option<Arc<Identity>>,
        mailbox: MailboxSender,
    ) -> Result<(), RoomError> {
        let (admitted, ack) = oneshot::channel();
        self.join_tx
            .send(JoinRequest {
                client,
                identity,
                mailbox,
                admitted,
            })
            .await
            .map_err(|_| RoomError::Closed)?;
        ack.await.map_err(|_| RoomError::Closed)
    }

    /// Ask the room to remove `client`.
    ///
    /// Never blocks, so it is safe to call from `Drop`. Leaving a client that
    /// is not registered is a no-op.
    pub fn leave(&self, client: ClientId) {
        if self.leave_tx.send(client).is_err() {
            debug!(client = %client, "Leave after room shut down");
        }
    }

    /// Queue a message for broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Closed`] if the room is not running.
    pub async fn broadcast(&self, message: Message) -> Result<(), RoomError> {
        self.forward_tx
            .send(message)
            .await
            .map_err(|_| RoomError::Closed)
    }

    /// Take a snapshot of the room.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Closed`] if the room is not running.
    pub async fn stats(&self) -> Result<RoomStats, RoomError> {
        let (reply, stats) = oneshot::channel();
        self.stats_tx
            .send(reply)
            .await
            .map_err(|_| RoomError::Closed)?;
        stats.await.map_err(|_| RoomError::Closed)
    }

    /// Whether the control loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.forward_tx.is_closed()
    }
}

/// The room control loop and its registry.
pub struct Room {
    config: RoomConfig,
    tracer: Arc<dyn Tracer>,
    members: HashMap<ClientId, MailboxSender>,
    stats: RoomStats,
    join_rx: mpsc::Receiver<JoinRequest>,
    leave_rx: mpsc::UnboundedReceiver<ClientId>,
    forward_rx: mpsc::Receiver<Message>,
    stats_rx: mpsc::Receiver<oneshot::Sender<RoomStats>>,
}

impl Room {
    /// Create a room and the handle used to reach it.
    ///
    /// The room does nothing until [`Room::run`] is polled.
    #[must_use]
    pub fn new(config: RoomConfig, tracer: Arc<dyn Tracer>) -> (Self, RoomHandle) {
        let (join_tx, join_rx) = mpsc::channel(config.join_capacity.max(1));
        let (leave_tx, leave_rx) = mpsc::unbounded_channel();
        let (forward_tx, forward_rx) = mpsc::channel(config.forward_capacity.max(1));
        let (stats_tx, stats_rx) = mpsc::channel(16);

        info!("Creating room with config: {:?}", config);

        let room = Self {
            config,
            tracer,
            members: HashMap::new(),
            stats: RoomStats::default(),
            join_rx,
            leave_rx,
            forward_rx,
            stats_rx,
        };
        let handle = RoomHandle {
            join_tx,
            leave_tx,
            forward_tx,
            stats_tx,
        };
        (room, handle)
    }

    /// Create a room and run its loop on a new task.
    #[must_use]
    pub fn spawn(config: RoomConfig, tracer: Arc<dyn Tracer>) -> (RoomHandle, JoinHandle<()>) {
        let (room, handle) = Self::new(config, tracer);
        (handle, tokio::spawn(room.run()))
    }

    /// Run the control loop until every [`RoomHandle`] is dropped.
    ///
    /// Ready events are picked without priority between sources.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(request) = self.join_rx.recv() => self.admit(request),
                Some(client) = self.leave_rx.recv() => self.remove(client),
                Some(message) = self.forward_rx.recv() => self.fan_out(message).await,
                Some(reply) = self.stats_rx.recv() => {
                    let _ = reply.send(self.snapshot());
                }
                else => break,
            }
        }

        debug!(members = self.members.len(), "Room loop stopped");
    }

    fn admit(&mut self, request: JoinRequest) {
        let JoinRequest {
            client,
            identity,
            mailbox,
            admitted,
        } = request;

        if self.members.contains_key(&client) {
            warn!(client = %client, "Ignoring duplicate join");
        } else {
            self.members.insert(client, mailbox);
            self.tracer.trace(&TraceEvent::Joined { client });
            debug!(
                client = %client,
                name = identity.as_deref().and_then(Identity::name).unwrap_or("anonymous"),
                members = self.members.len(),
                "Client joined"
            );
        }

        // the joiner may have given up waiting; it is registered either way
        let _ = admitted.send(());
    }

    fn remove(&mut self, client: ClientId) {
        // the room holds the only sender, so dropping it closes the mailbox
        if self.members.remove(&client).is_some() {
            self.tracer.trace(&TraceEvent::Left { client });
            debug!(client = %client, members = self.members.len(), "Client left");
        }
    }

    fn evict(&mut self, client: ClientId, reason: EvictionReason, undelivered: MessageId) {
        if self.members.remove(&client).is_some() {
            self.stats.evictions += 1;
            self.tracer.trace(&TraceEvent::Evicted { client, reason });
            warn!(
                client = %client,
                reason = %reason,
                message_id = undelivered,
                "Client evicted"
            );
        }
    }

    async fn fan_out(&mut self, message: Message) {
        let message = Arc::new(message);
        self.stats.messages_broadcast += 1;
        self.tracer.trace(&TraceEvent::Received { message: &message });

        let mut evicted = Vec::new();
        for (&client, mailbox) in &self.members {
            if !self.config.echo_to_sender && message.sender() == Some(client) {
                continue;
            }

            let outcome = match self.config.overflow {
                OverflowPolicy::Evict => match mailbox.try_send(Arc::clone(&message)) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => Err(EvictionReason::MailboxFull),
                    Err(TrySendError::Closed(_)) => Err(EvictionReason::MailboxClosed),
                },
                OverflowPolicy::Block => mailbox
                    .send(Arc::clone(&message))
                    .await
                    .map_err(|_| EvictionReason::MailboxClosed),
            };

            match outcome {
                Ok(()) => {
                    self.stats.deliveries += 1;
                    self.tracer.trace(&TraceEvent::Delivered { client });
                }
                Err(reason) => evicted.push((client, reason)),
            }
        }

        for (client, reason) in evicted {
            self.evict(client, reason, message.id());
        }
    }

    fn snapshot(&self) -> RoomStats {
        let mut members: Vec<ClientId> = self.members.keys().copied().collect();
        members.sort_unstable();
        RoomStats {
            members,
            ..self.stats.clone()
        }
    }
}
