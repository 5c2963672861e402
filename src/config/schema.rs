//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the fabric.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::state::ServiceKind;

/// Root configuration for the messaging fabric.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FabricConfig {
    /// Listener configuration (bind address, frame limits).
    pub listener: ListenerConfig,

    /// Broker (server role) settings.
    pub broker: BrokerConfig,

    /// Endpoint (client role) settings.
    pub endpoint: EndpointConfig,

    /// Health probing settings.
    pub health: HealthConfig,

    /// Services declared up front instead of registering over HTTP.
    pub services: Vec<ServiceConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8768").
    pub bind_address: String,

    /// Largest accepted WebSocket message in bytes.
    pub max_message_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8768".to_string(),
            max_message_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Path serving the WebSocket upgrade.
    pub path: String,

    /// Liveness check interval per client, in milliseconds.
    pub ping_interval_ms: u64,

    /// Outbound queue capacity per client.
    pub client_queue: usize,

    /// How long `stop()` waits for clients to acknowledge the close frame.
    pub close_timeout_ms: u64,

    /// Domain message types re-broadcast to every connected client.
    pub relay_types: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            ping_interval_ms: 30_000,
            client_queue: 256,
            close_timeout_ms: 2_000,
            relay_types: vec![
                "channel_update".to_string(),
                "transaction".to_string(),
                "rebalance_suggestion".to_string(),
            ],
        }
    }
}

impl BrokerConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Endpoint (client) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Heartbeat interval in milliseconds.
    pub ping_interval_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Base delay for exponential reconnect backoff in milliseconds.
    pub reconnect_base_ms: u64,

    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,

    /// Messages kept while disconnected (drop-oldest beyond this).
    pub max_buffered_messages: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
            reconnect_base_ms: 1_000,
            max_reconnect_attempts: 10,
            max_buffered_messages: 50,
        }
    }
}

impl EndpointConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Health probing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable the periodic aggregator.
    pub enabled: bool,

    /// Poll interval in seconds.
    pub poll_interval_secs: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path probed on `http` services when no address is declared.
    pub path: String,

    /// Consecutive failures before a service is reported unavailable.
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 10,
            timeout_ms: 5_000,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
        }
    }
}

impl HealthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A service declared in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Unique service identifier.
    pub id: String,

    /// Display name (defaults to the id).
    #[serde(default)]
    pub name: Option<String>,

    /// Probe strategy.
    pub kind: ServiceKind,

    /// Host the service listens on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the service listens on.
    pub port: u16,

    /// Explicit health-check address; derived from kind + port when absent.
    #[serde(default)]
    pub health_check: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
