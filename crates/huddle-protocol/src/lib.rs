//! # huddle-protocol
//!
//! The JSON envelope Huddle chat clients exchange.
//!
//! The room itself relays opaque bytes. Browser clients wrap each chat line in
//! an envelope, and the server stamps the sender's name, avatar and the time of
//! receipt before the line enters the room.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::ChatMessage;
//!
//! let mut msg = ChatMessage::decode(br#"{"Message":"hi"}"#).unwrap();
//! msg.stamp(Some("Alice"), None, 1_700_000_000_000);
//!
//! let wire = msg.encode().unwrap();
//! assert_eq!(ChatMessage::decode(&wire).unwrap().name.as_deref(), Some("Alice"));
//! ```

pub mod envelope;

pub use envelope::{stamp_object, ChatMessage, ProtocolError, MAX_MESSAGE_SIZE};
