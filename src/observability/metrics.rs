//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fabric_clients_connected` (gauge): clients in the broker table
//! - `fabric_messages_total` (counter): frames by direction and type
//! - `fabric_broadcast_recipients` (histogram): clients reached per broadcast
//! - `fabric_probe_duration_seconds` (histogram): probe latency by kind, outcome
//! - `fabric_service_status_transitions_total` (counter): by from/to status
//! - `fabric_endpoint_reconnects_total` (counter): scheduled reconnects
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is only installed when enabled in config

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{FabricError, Result};

pub const CLIENTS_CONNECTED: &str = "fabric_clients_connected";
pub const MESSAGES_TOTAL: &str = "fabric_messages_total";
pub const BROADCAST_RECIPIENTS: &str = "fabric_broadcast_recipients";
pub const PROBE_DURATION_SECONDS: &str = "fabric_probe_duration_seconds";
pub const STATUS_TRANSITIONS_TOTAL: &str = "fabric_service_status_transitions_total";
pub const ENDPOINT_RECONNECTS_TOTAL: &str = "fabric_endpoint_reconnects_total";

/// Install the global Prometheus recorder with its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| FabricError::Internal(format!("metrics exporter: {e}")))?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_clients_connected(count: usize) {
    gauge!(CLIENTS_CONNECTED).set(count as f64);
}

/// `direction` is `in` or `out`.
pub fn record_message(direction: &'static str, message_type: &str) {
    counter!(MESSAGES_TOTAL, "direction" => direction, "type" => message_type.to_string())
        .increment(1);
}

pub fn record_broadcast(recipients: usize) {
    histogram!(BROADCAST_RECIPIENTS).record(recipients as f64);
}

pub fn record_probe(kind: &'static str, healthy: bool, elapsed: Duration) {
    let outcome = if healthy { "success" } else { "failure" };
    histogram!(PROBE_DURATION_SECONDS, "kind" => kind, "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

pub fn record_status_transition(from: &'static str, to: &'static str) {
    counter!(STATUS_TRANSITIONS_TOTAL, "from" => from, "to" => to).increment(1);
}

pub fn record_reconnect() {
    counter!(ENDPOINT_RECONNECTS_TOTAL).increment(1);
}
