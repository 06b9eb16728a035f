//! Connection decorator that stamps chat envelopes.
//!
//! Inbound frames that are JSON objects get the sender's identity and the
//! receipt time written into them before they reach the room. Frames that are
//! not JSON objects pass through untouched; the room relays bytes. An object
//! from an identified client that cannot be stamped is dropped, so a client
//! never speaks under a name it picked itself.

use async_trait::async_trait;
use bytes::Bytes;
use huddle_core::message::now_millis;
use huddle_core::Identity;
use huddle_protocol::{stamp_object, ChatMessage};
use huddle_transport::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};
use tracing::{debug, warn};

/// Wraps a connection and rewrites its inbound envelopes.
pub struct StampingConnection {
    inner: Box<dyn Connection>,
    name: Option<String>,
    avatar_url: Option<String>,
}

impl StampingConnection {
    /// Stamp frames read from `inner` with the given identity.
    #[must_use]
    pub fn new(inner: Box<dyn Connection>, identity: Option<&Identity>) -> Self {
        Self {
            inner,
            name: identity.and_then(Identity::name).map(str::to_owned),
            avatar_url: identity.and_then(Identity::avatar_url).map(str::to_owned),
        }
    }
}

impl Connection for StampingConnection {
    fn id(&self) -> &ConnectionId {
        self.inner.id()
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (reader, writer) = self.inner.split();
        let reader = StampingReader {
            inner: reader,
            name: self.name,
            avatar_url: self.avatar_url,
        };
        (Box::new(reader), writer)
    }
}

struct StampingReader {
    inner: Box<dyn FrameReader>,
    name: Option<String>,
    avatar_url: Option<String>,
}

impl StampingReader {
    /// `None` means the frame must not reach the room.
    fn stamp(&self, frame: Bytes) -> Option<Bytes> {
        let name = self.name.as_deref();
        let avatar_url = self.avatar_url.as_deref();
        let now = now_millis();

        let stamped = match ChatMessage::decode(&frame) {
            Ok(mut message) => {
                message.stamp(name, avatar_url, now);
                message.encode().map(Some)
            }
            Err(e) => {
                debug!(error = %e, "Frame is not a chat envelope");
                stamp_object(&frame, name, avatar_url, now)
            }
        };

        match stamped {
            Ok(Some(stamped)) => Some(stamped),
            Ok(None) => Some(frame),
            Err(e) if name.is_some() || avatar_url.is_some() => {
                warn!(error = %e, "Dropping envelope that cannot carry the sender identity");
                None
            }
            Err(e) => {
                debug!(error = %e, "Relaying unstamped frame");
                Some(frame)
            }
        }
    }
}

#[async_trait]
impl FrameReader for StampingReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        while let Some(frame) = self.inner.read_frame().await? {
            if let Some(frame) = self.stamp(frame) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::MAX_MESSAGE_SIZE;
    use huddle_transport::memory;
    use serde_json::{json, Value};

    fn alice() -> Identity {
        let fields = json!({"name": "Alice", "avatar_url": "http://img/a.png"});
        Identity::new(fields.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_stamps_name_and_time() {
        let (conn, peer) = memory::pair_with_id("stamped");
        let conn = StampingConnection::new(Box::new(conn), Some(&alice()));
        assert_eq!(conn.id().as_str(), "stamped");

        let (mut reader, _writer) = Box::new(conn).split();
        peer.send(r#"{"Name":"mallory","Message":"hi"}"#);

        let frame = reader.read_frame().await.unwrap().unwrap();
        let message = ChatMessage::decode(&frame).unwrap();
        assert_eq!(message.name.as_deref(), Some("Alice"));
        assert_eq!(message.avatar_url.as_deref(), Some("http://img/a.png"));
        assert_eq!(message.message, "hi");
        assert!(message.when.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_anonymous_gets_time_only() {
        let (conn, peer) = memory::pair();
        let (mut reader, _writer) = Box::new(StampingConnection::new(Box::new(conn), None)).split();
        peer.send(r#"{"Message":"hi"}"#);

        let message = ChatMessage::decode(&reader.read_frame().await.unwrap().unwrap()).unwrap();
        assert!(message.name.is_none());
        assert!(message.when.is_some());
    }

    #[tokio::test]
    async fn test_passes_through_plain_frames_and_close() {
        let (conn, mut peer) = memory::pair();
        let (mut reader, mut writer) =
            Box::new(StampingConnection::new(Box::new(conn), Some(&alice()))).split();

        peer.send("just text");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), "just text");

        writer.write_frame(Bytes::from_static(b"out")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), "out");

        peer.hang_up();
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_wins_over_malformed_envelope() {
        let fields = json!({"name": "Bob"});
        let bob = Identity::new(fields.as_object().cloned().unwrap());
        let (conn, peer) = memory::pair();
        let (mut reader, _writer) =
            Box::new(StampingConnection::new(Box::new(conn), Some(&bob))).split();

        peer.send(r#"{"Name":"Alice","Message":"I am Alice","When":"now"}"#);

        let frame = reader.read_frame().await.unwrap().unwrap();
        let value: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["Name"], "Bob");
        assert_eq!(value["Message"], "I am Alice");
        assert!(value["When"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unstampable_envelope_is_dropped_for_identified_client() {
        let (conn, peer) = memory::pair();
        let (mut reader, _writer) =
            Box::new(StampingConnection::new(Box::new(conn), Some(&alice()))).split();

        // fits before stamping, overflows once name and avatar are added
        let filler = "x".repeat(MAX_MESSAGE_SIZE - 40);
        peer.send(json!({ "Name": "mallory", "Message": filler }).to_string());
        peer.send(r#"{"Message":"after"}"#);

        let frame = reader.read_frame().await.unwrap().unwrap();
        let message = ChatMessage::decode(&frame).unwrap();
        assert_eq!(message.message, "after");
        assert_eq!(message.name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_unstampable_envelope_relayed_for_anonymous_client() {
        let (conn, peer) = memory::pair();
        let (mut reader, _writer) = Box::new(StampingConnection::new(Box::new(conn), None)).split();

        let raw = json!({ "Name": "guest", "Message": "x".repeat(MAX_MESSAGE_SIZE - 10) })
            .to_string();
        peer.send(raw.clone());

        assert_eq!(reader.read_frame().await.unwrap().unwrap(), raw.as_bytes());
    }
}
