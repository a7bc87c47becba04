//! Metrics collection and export for Parlor.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parlor_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parlor_connections_active";
    pub const FRAMES_TOTAL: &str = "parlor_frames_total";
    pub const FRAMES_BYTES: &str = "parlor_frames_bytes";
    pub const MESSAGES_ROUTED: &str = "parlor_messages_routed_total";
    pub const DELIVERIES_DROPPED: &str = "parlor_deliveries_dropped_total";
    pub const PRESENCE_UPDATES: &str = "parlor_presence_updates_total";
    pub const ROOMS_CREATED: &str = "parlor_rooms_created_total";
    pub const ROOMS_ACTIVE: &str = "parlor_rooms_active";
    pub const ROUTING_LATENCY_SECONDS: &str = "parlor_routing_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parlor_errors_total";
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
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::MESSAGES_ROUTED,
        "Chat messages persisted and fanned out"
    );
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Deliveries dropped because a connection outbox was full"
    );
    metrics::describe_counter!(
        names::PRESENCE_UPDATES,
        "Online-user snapshots written to connections"
    );
    metrics::describe_counter!(
        names::ROOMS_CREATED,
        "Rooms created, explicitly or by a first join"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one member");
    metrics::describe_histogram!(
        names::ROUTING_LATENCY_SECONDS,
        "Time to persist and fan out one message, in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

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

/// Record a frame crossing the socket.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a routed chat message.
pub fn record_routed(private: bool, dropped: usize, seconds: f64) {
    let kind = if private { "private" } else { "room" };
    counter!(names::MESSAGES_ROUTED, "kind" => kind).increment(1);
    if dropped > 0 {
        counter!(names::DELIVERIES_DROPPED).increment(dropped as u64);
    }
    histogram!(names::ROUTING_LATENCY_SECONDS).record(seconds);
}

/// Record an online-user snapshot sent to one connection.
pub fn record_presence_update() {
    counter!(names::PRESENCE_UPDATES).increment(1);
}

/// Record a newly created room.
pub fn record_room_created() {
    counter!(names::ROOMS_CREATED).increment(1);
}

/// Update the number of rooms with members.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
