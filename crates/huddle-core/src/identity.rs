//! Optional per-client identity metadata.
//!
//! An identity is an opaque JSON object resolved from request-level state
//! before a client exists. The room only carries it alongside messages.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Identity decoding errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Not valid base64.
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("Identity must be a JSON object")]
    NotAnObject,
}

/// Immutable identity metadata for a connected client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Map<String, Value>);

impl Identity {
    /// An identity with no fields.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build an identity from a JSON object.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Decode a base64-encoded JSON object, the format of the `auth` cookie.
    ///
    /// Both the standard and the URL-safe alphabets are accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not base64, not JSON, or not an object.
    pub fn from_base64_json(encoded: &str) -> Result<Self, IdentityError> {
        let encoded = encoded.trim();
        let raw = match STANDARD.decode(encoded) {
            Ok(raw) => raw,
            Err(e) => URL_SAFE.decode(encoded).map_err(|_| e)?,
        };

        match serde_json::from_slice::<Value>(&raw)? {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(IdentityError::NotAnObject),
        }
    }

    /// Encode as base64 JSON, the inverse of [`Identity::from_base64_json`].
    #[must_use]
    pub fn to_base64_json(&self) -> String {
        STANDARD.encode(Value::Object(self.0.clone()).to_string())
    }

    /// Look up a raw field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Display name (`name` field).
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    /// Avatar URL (`avatar_url` field).
    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        self.get("avatar_url").and_then(Value::as_str)
    }

    /// Whether the identity carries no fields.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}
