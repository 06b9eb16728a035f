//! HTTP handlers for the Huddle server.
//!
//! `GET /room` upgrades to a WebSocket and hands the socket to the acceptor,
//! which keeps the connection in the room until it closes. `GET /health`
//! reports the room's member count.

use crate::config::Config;
use crate::identity;
use crate::metrics::{self, ConnectionMetricsGuard, MetricsTracer};
use crate::stamping::StampingConnection;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use huddle_core::{trace, Acceptor, Identity, LogTracer, Room, Tracer};
use huddle_transport::{AxumConnection, Connection};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Admits upgraded sockets into the room.
    pub acceptor: Acceptor,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Start the room and build the state around it.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (room, _task) = Room::spawn(config.room.room_config(), build_tracer(&config));
        Self {
            acceptor: Acceptor::new(room, config.room.acceptor_config()),
            config,
        }
    }
}

/// Pick the room tracer for the configured profile.
fn build_tracer(config: &Config) -> Arc<dyn Tracer> {
    let tracer: Arc<dyn Tracer> = if config.trace.enabled {
        Arc::new(LogTracer)
    } else {
        trace::off()
    };

    if config.metrics.enabled {
        Arc::new(MetricsTracer::new(tracer))
    } else {
        tracer
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(room_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, config, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let path = config.transport.websocket_path.clone();
    let state = Arc::new(AppState::new(config));

    info!("Huddle server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, path);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.acceptor.room().stats().await {
        Ok(stats) => axum::Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "members": stats.member_count()
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({
                "status": "unavailable",
                "version": env!("CARGO_PKG_VERSION"),
                "error": e.to_string()
            })),
        )
            .into_response(),
    }
}

/// WebSocket upgrade handler.
async fn room_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match identity::from_headers(&headers, &state.config.identity) {
        Ok(identity) => identity,
        Err(rejection) => {
            warn!(remote = %addr, error = %rejection, "Upgrade rejected");
            metrics::record_error("identity");
            return rejection.into_response();
        }
    };

    ws.max_message_size(state.config.transport.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(remote = %addr, error = %e, "WebSocket upgrade failed");
            metrics::record_error("upgrade");
        })
        .on_upgrade(move |socket| handle_websocket(socket, addr, identity, state))
}

/// Serve one upgraded socket until it disconnects.
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    identity: Option<Identity>,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let transport = &state.config.transport;
    let conn = AxumConnection::new(socket, Some(addr), transport.max_message_size);
    let conn: Box<dyn Connection> = if transport.stamp_envelopes {
        Box::new(StampingConnection::new(Box::new(conn), identity.as_ref()))
    } else {
        Box::new(conn)
    };

    debug!(connection = %conn.id(), remote = %addr, "WebSocket connected");

    match state.acceptor.serve(conn, identity).await {
        Ok(summary) => debug!(
            connection = %summary.connection,
            client = %summary.client,
            frames_read = summary.frames_read,
            frames_written = summary.frames_written,
            "WebSocket disconnected"
        ),
        Err(e) => {
            warn!(remote = %addr, error = %e, "Connection not admitted");
            metrics::record_error("admission");
        }
    }
}
