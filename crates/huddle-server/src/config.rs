//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`huddle.toml` in the working directory, `/etc/huddle/` or
//!   `~/.config/huddle/`, or the path in `HUDDLE_CONFIG`)
//! - Environment variables (`HUDDLE__SECTION__KEY`, e.g. `HUDDLE__ROOM__ECHO_TO_SENDER`)

use anyhow::{Context, Result};
use huddle_core::{AcceptorConfig, OverflowPolicy, RoomConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Room tuning.
    #[serde(default)]
    pub room: RoomSettings,

    /// Room event tracing.
    #[serde(default)]
    pub trace: TraceConfig,

    /// Cookie identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Room tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSettings {
    /// Slots in each client mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Slots in the room's broadcast queue.
    #[serde(default = "default_forward_capacity")]
    pub forward_capacity: usize,

    /// Slots in the room's join queue.
    #[serde(default = "default_join_capacity")]
    pub join_capacity: usize,

    /// Deliver a message back to its sender.
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,

    /// What to do with a client whose mailbox is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Room event tracing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Log every join, leave, eviction and delivery.
    #[serde(default)]
    pub enabled: bool,
}

/// Cookie identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Cookie carrying the base64 JSON identity.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Reject upgrades without the cookie.
    #[serde(default)]
    pub required: bool,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Stamp sender name and time into chat envelopes.
    #[serde(default = "default_true")]
    pub stamp_envelopes: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HUDDLE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HUDDLE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_mailbox_capacity() -> usize {
    huddle_core::acceptor::DEFAULT_MAILBOX_CAPACITY
}

fn default_forward_capacity() -> usize {
    1024
}

fn default_join_capacity() -> usize {
    64
}

fn default_cookie_name() -> String {
    "auth".to_string()
}

fn default_ws_path() -> String {
    "/room".to_string()
}

fn default_max_message_size() -> usize {
    huddle_protocol::MAX_MESSAGE_SIZE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            room: RoomSettings::default(),
            trace: TraceConfig::default(),
            identity: IdentityConfig::default(),
            transport: TransportConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            forward_capacity: default_forward_capacity(),
            join_capacity: default_join_capacity(),
            echo_to_sender: true,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            required: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
            stamp_envelopes: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl RoomSettings {
    /// Settings for the room control loop.
    #[must_use]
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            forward_capacity: self.forward_capacity,
            join_capacity: self.join_capacity,
            echo_to_sender: self.echo_to_sender,
            overflow: self.overflow,
        }
    }

    /// Settings for the connection acceptor.
    #[must_use]
    pub fn acceptor_config(&self) -> AcceptorConfig {
        AcceptorConfig {
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with environment
    /// overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("HUDDLE_CONFIG").ok();
        let config_paths = [
            "huddle.toml",
            "/etc/huddle/huddle.toml",
            "~/.config/huddle/huddle.toml",
        ];

        let found = explicit
            .iter()
            .map(String::as_str)
            .chain(config_paths)
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::load_from(found.as_deref())
    }

    /// Layer an optional TOML file and `HUDDLE__*` environment variables over
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment value cannot be parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HUDDLE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
