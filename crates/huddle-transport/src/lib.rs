//! # huddle-transport
//!
//! Transport abstraction layer for the Huddle chat room.
//!
//! The room never negotiates a handshake. It receives an established
//! [`Connection`], splits it, and drives each half from its own task:
//!
//! - **WebSocket** - tokio-tungstenite over any async stream
//! - **Axum** - sockets produced by axum's `WebSocketUpgrade`
//! - **Memory** - in-process pairs for tests and benchmarks
//!
//! ```rust,ignore
//! use huddle_transport::Connection;
//!
//! async fn echo(conn: Box<dyn Connection>) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.read_frame().await {
//!         if writer.write_frame(frame).await.is_err() {
//!             break;
//!         }
//!     }
//!     let _ = writer.close().await;
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "axum")]
pub mod axum_ws;

pub use traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

#[cfg(feature = "axum")]
pub use axum_ws::AxumConnection;
