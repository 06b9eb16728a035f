//! Pluggable trace sink for room activity.
//!
//! The room reports every admission, departure, eviction and broadcast to a
//! [`Tracer`]. [`NoopTracer`] is the silent profile; [`LogTracer`] forwards to
//! `tracing`; [`MemoryTracer`] keeps the rendered lines for inspection.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::client::ClientId;
use crate::message::{Message, MessageId};

/// Why the room dropped a client on its own initiative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The mailbox had no free slot.
    MailboxFull,
    /// The write pump is gone and no longer drains the mailbox.
    MailboxClosed,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MailboxFull => f.write_str("mailbox full"),
            Self::MailboxClosed => f.write_str("mailbox closed"),
        }
    }
}

/// A single room event.
#[derive(Debug, Clone, Copy)]
pub enum TraceEvent<'a> {
    /// A client was admitted.
    Joined {
        /// The admitted client.
        client: ClientId,
    },
    /// A client left on request.
    Left {
        /// The departed client.
        client: ClientId,
    },
    /// A client was removed by the delivery policy.
    Evicted {
        /// The evicted client.
        client: ClientId,
        /// Why it was removed.
        reason: EvictionReason,
    },
    /// A message arrived for broadcast.
    Received {
        /// The message.
        message: &'a Message,
    },
    /// A message was queued in a client's mailbox.
    Delivered {
        /// The recipient.
        client: ClientId,
    },
}

impl TraceEvent<'_> {
    /// Human-readable description of the event.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "New client joined",
            Self::Left { .. } => "Client left",
            Self::Evicted { .. } => "Client evicted",
            Self::Received { .. } => "Message received",
            Self::Delivered { .. } => " -- sent to client",
        }
    }

    /// Payload attached to the event.
    #[must_use]
    pub fn payload(&self) -> Option<String> {
        match self {
            Self::Joined { client } | Self::Left { client } | Self::Delivered { client } => {
                Some(client.to_string())
            }
            Self::Evicted { client, reason } => Some(format!("{} ({})", client, reason)),
            Self::Received { message } => {
                Some(String::from_utf8_lossy(message.payload()).into_owned())
            }
        }
    }

    /// ID of the message the event concerns, if any.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Received { message } => Some(message.id()),
            _ => None,
        }
    }
}

impl fmt::Display for TraceEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload() {
            Some(payload) => write!(f, "{}: {}", self.description(), payload),
            None => f.write_str(self.description()),
        }
    }
}

/// Receives room events.
pub trait Tracer: Send + Sync {
    /// Record one event.
    fn trace(&self, event: &TraceEvent<'_>);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn trace(&self, _event: &TraceEvent<'_>) {}
}

/// Forwards events to the `tracing` subscriber at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn trace(&self, event: &TraceEvent<'_>) {
        let description = event.description();
        match (event.payload(), event.message_id()) {
            (Some(payload), Some(id)) => debug!(
                target: "huddle::room",
                message_id = id,
                payload = %payload,
                "{}",
                description
            ),
            (Some(payload), None) => debug!(
                target: "huddle::room",
                payload = %payload,
                "{}",
                description
            ),
            (None, _) => debug!(target: "huddle::room", "{}", description),
        }
    }
}

/// Keeps every rendered event in memory.
#[derive(Debug, Default)]
pub struct MemoryTracer {
    lines: Mutex<Vec<String>>,
}

impl MemoryTracer {
    /// Create an empty tracer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered events so far, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether any rendered event contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl Tracer for MemoryTracer {
    fn trace(&self, event: &TraceEvent<'_>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(event.to_string());
        }
    }
}

/// The silent tracer.
#[must_use]
pub fn off() -> Arc<dyn Tracer> {
    Arc::new(NoopTracer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_rendering() {
        let client = ClientId::generate();
        let message = Message::new("hello");

        assert_eq!(
            TraceEvent::Joined { client }.to_string(),
            format!("New client joined: {}", client)
        );
        assert_eq!(
            TraceEvent::Received { message: &message }.to_string(),
            "Message received: hello"
        );
        assert_eq!(
            TraceEvent::Evicted {
                client,
                reason: EvictionReason::MailboxFull
            }
            .payload(),
            Some(format!("{} (mailbox full)", client))
        );
    }

    #[test]
    fn test_only_received_carries_message_id() {
        let client = ClientId::generate();
        let message = Message::new("hello");

        assert_eq!(
            TraceEvent::Received { message: &message }.message_id(),
            Some(message.id())
        );
        assert_eq!(TraceEvent::Delivered { client }.message_id(), None);
        assert_eq!(TraceEvent::Joined { client }.message_id(), None);
    }

    #[test]
    fn test_memory_tracer_records_in_order() {
        let tracer = MemoryTracer::new();
        let client = ClientId::generate();

        tracer.trace(&TraceEvent::Joined { client });
        tracer.trace(&TraceEvent::Left { client });

        let lines = tracer.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("New client joined"));
        assert!(lines[1].starts_with("Client left"));
        assert!(tracer.contains("Client left"));
    }

    #[test]
    fn test_silent_tracers_accept_events() {
        let message = Message::new("x");
        off().trace(&TraceEvent::Received { message: &message });
        LogTracer.trace(&TraceEvent::Received { message: &message });
    }
}
