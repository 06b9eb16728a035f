//! Messages passed through the room.
//!
//! A [`Message`] is created by a client's read pump, moved into the room and
//! then shared, never mutated, by every recipient mailbox.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::ClientId;
use crate::identity::Identity;

/// A unique message identifier.
pub type MessageId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn generate_message_id() -> MessageId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// An immutable payload unit broadcast to the room.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    sender: Option<ClientId>,
    identity: Option<Arc<Identity>>,
    payload: Bytes,
}

impl Message {
    /// Create a new message with no sender.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            sender: None,
            identity: None,
            payload: payload.into(),
        }
    }

    /// Tag the message with the client that sent it.
    #[must_use]
    pub fn with_sender(mut self, sender: ClientId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Attach the sender's identity.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Process-unique ID, carried in room log lines.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Sending client, if the message came from one.
    #[must_use]
    pub fn sender(&self) -> Option<ClientId> {
        self.sender
    }

    /// Sender identity, if the client was not anonymous.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
