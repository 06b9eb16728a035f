//! Cookie identity extraction.
//!
//! The identity travels in a cookie (named `auth` by default) holding a base64
//! encoded JSON object. It is resolved from the upgrade request before the
//! WebSocket handshake completes, so a bad cookie never reaches the room.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use huddle_core::{Identity, IdentityError};
use thiserror::Error;

use crate::config::IdentityConfig;

/// Why an upgrade request was turned away.
#[derive(Debug, Error)]
pub enum IdentityRejection {
    /// The cookie is present but cannot be decoded.
    #[error("Malformed identity cookie: {0}")]
    Malformed(#[from] IdentityError),

    /// The cookie is required but absent.
    #[error("Missing identity cookie")]
    Missing,
}

impl IdentityRejection {
    /// HTTP status for the rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Missing => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for IdentityRejection {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Resolve the identity carried by a request.
///
/// Returns `Ok(None)` for an anonymous client.
///
/// # Errors
///
/// Rejects a malformed cookie, and a missing one when the config requires it.
pub fn from_headers(
    headers: &HeaderMap,
    config: &IdentityConfig,
) -> Result<Option<Identity>, IdentityRejection> {
    match find_cookie(headers, &config.cookie_name) {
        Some(value) => Ok(Some(Identity::from_base64_json(value)?)),
        None if config.required => Err(IdentityRejection::Missing),
        None => Ok(None),
    }
}

fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}
