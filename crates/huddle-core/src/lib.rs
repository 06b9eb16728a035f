//! # huddle-core
//!
//! A single broadcast chat room and the clients connected to it.
//!
//! This crate provides the building blocks:
//!
//! - **Room** - Actor that owns the member registry and fans messages out
//! - **Client** - Per-connection read and write pumps
//! - **Acceptor** - Admits an upgraded connection and drives it to completion
//! - **Trace** - Pluggable sink for room events
//! - **Identity** - Opaque per-client metadata resolved before admission
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  broadcast  ┌────────────┐  mailbox  ┌────────────┐
//! │  ReadPump  │────────────▶│    Room    │──────────▶│ WritePump  │
//! └────────────┘             └────────────┘           └────────────┘
//!       ▲                          │                        │
//!       │ frames                   ▼                        ▼ frames
//! ┌────────────┐             ┌────────────┐           ┌────────────┐
//! │ Connection │             │   Tracer   │           │ Connection │
//! └────────────┘             └────────────┘           └────────────┘
//! ```

pub mod acceptor;
pub mod client;
pub mod identity;
pub mod message;
pub mod room;
pub mod trace;

pub use acceptor::{AcceptError, Acceptor, AcceptorConfig, SessionSummary};
pub use client::{Client, ClientId, LeaveGuard, ReadPump, WritePump};
pub use identity::{Identity, IdentityError};
pub use message::Message;
pub use room::{OverflowPolicy, Room, RoomConfig, RoomError, RoomHandle, RoomStats};
pub use trace::{EvictionReason, LogTracer, MemoryTracer, NoopTracer, TraceEvent, Tracer};
