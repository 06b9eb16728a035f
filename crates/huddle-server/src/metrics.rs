//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::{TraceEvent, Tracer};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const MEMBERS: &str = "huddle_room_members";
    pub const MESSAGES_TOTAL: &str = "huddle_messages_total";
    pub const MESSAGES_BYTES: &str = "huddle_messages_bytes";
    pub const DELIVERIES_TOTAL: &str = "huddle_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "huddle_evictions_total";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(names::MEMBERS, "Current number of room members");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages broadcast");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages broadcast");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of messages placed in a mailbox"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Total number of clients evicted by the room"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// Tracer that turns room events into metrics, then hands them on.
pub struct MetricsTracer {
    inner: Arc<dyn Tracer>,
}

impl MetricsTracer {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Tracer>) -> Self {
        Self { inner }
    }
}

impl Tracer for MetricsTracer {
    fn trace(&self, event: &TraceEvent<'_>) {
        match event {
            TraceEvent::Joined { .. } => gauge!(names::MEMBERS).increment(1.0),
            TraceEvent::Left { .. } => gauge!(names::MEMBERS).decrement(1.0),
            TraceEvent::Evicted { reason, .. } => {
                gauge!(names::MEMBERS).decrement(1.0);
                counter!(names::EVICTIONS_TOTAL, "reason" => reason.to_string()).increment(1);
            }
            TraceEvent::Received { message } => {
                counter!(names::MESSAGES_TOTAL).increment(1);
                counter!(names::MESSAGES_BYTES).increment(message.payload_size() as u64);
            }
            TraceEvent::Delivered { .. } => counter!(names::DELIVERIES_TOTAL).increment(1),
        }
        self.inner.trace(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{ClientId, MemoryTracer, Message};

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_metrics_tracer_forwards() {
        let memory = Arc::new(MemoryTracer::new());
        let tracer = MetricsTracer::new(memory.clone());
        let message = Message::new("hi");

        tracer.trace(&TraceEvent::Joined {
            client: ClientId::generate(),
        });
        tracer.trace(&TraceEvent::Received { message: &message });

        assert_eq!(memory.lines().len(), 2);
        assert!(memory.contains("Message received: hi"));
    }
}
