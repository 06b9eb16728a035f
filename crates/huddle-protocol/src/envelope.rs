//! Chat envelope encoding and decoding.
//!
//! Field names on the wire are capitalized (`Name`, `Message`, `When`,
//! `AvatarURL`) to match the browser client.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum encoded envelope size (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    TooLarge(usize),

    /// Malformed JSON or missing `Message` field.
    #[error("Invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// One chat line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the author.
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The text itself.
    #[serde(rename = "Message")]
    pub message: String,

    /// Server receipt time in Unix milliseconds.
    #[serde(rename = "When", default, skip_serializing_if = "Option::is_none")]
    pub when: Option<u64>,

    /// Author avatar.
    #[serde(rename = "AvatarURL", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ChatMessage {
    /// Create an unstamped message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Parse a client-submitted envelope. Only `Message` is required.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is too large or is not an envelope.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }
        Ok(serde_json::from_slice(data)?)
    }

    /// Fill in the server-side fields.
    ///
    /// `When` is always overwritten. `Name` and `AvatarURL` are overwritten
    /// only when the connection carries an identity that provides them, so
    /// anonymous clients keep whatever they sent.
    pub fn stamp(&mut self, name: Option<&str>, avatar_url: Option<&str>, now_millis: u64) {
        if let Some(name) = name {
            self.name = Some(name.to_owned());
        }
        if let Some(avatar_url) = avatar_url {
            self.avatar_url = Some(avatar_url.to_owned());
        }
        self.when = Some(now_millis);
    }

    /// Encode to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded envelope is too large.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let data = serde_json::to_vec(self)?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }
        Ok(Bytes::from(data))
    }
}

/// Stamp the server-side fields into any JSON object, even one that does not
/// decode as a [`ChatMessage`] (a string `When`, a missing `Message`, ...).
///
/// Stamping follows [`ChatMessage::stamp`]. Every other field is kept as sent.
/// Returns `Ok(None)` when `data` is not a JSON object at all.
///
/// # Errors
///
/// Returns an error if the stamped object is too large.
pub fn stamp_object(
    data: &[u8],
    name: Option<&str>,
    avatar_url: Option<&str>,
    now_millis: u64,
) -> Result<Option<Bytes>, ProtocolError> {
    let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(data) else {
        return Ok(None);
    };

    if let Some(name) = name {
        fields.insert("Name".to_owned(), Value::from(name));
    }
    if let Some(avatar_url) = avatar_url {
        fields.insert("AvatarURL".to_owned(), Value::from(avatar_url));
    }
    fields.insert("When".to_owned(), Value::from(now_millis));

    let data = serde_json::to_vec(&fields)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }
    Ok(Some(Bytes::from(data)))
}
