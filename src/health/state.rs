//! Service health state.
//!
//! # States
//! ```text
//! unknown → starting → running ⇄ error
//!                         ↓
//!                      stopping → stopped
//! ```
//! Probes only ever move a service between `running` and `error`; the other
//! states are reported by the service itself through `update_service`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Error => "error",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a service can be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// HTTP GET against a health URL.
    Http,
    /// Transient WebSocket connect.
    Socket,
    /// No live probe; status is self-reported.
    Standalone,
    /// Any kind this build does not know; treated like `Standalone`.
    #[serde(other)]
    Unknown,
}

impl ServiceKind {
    pub fn is_probeable(&self) -> bool {
        matches!(self, ServiceKind::Http | ServiceKind::Socket)
    }
}

/// Outcome of a single probe. Ephemeral: merged into the descriptor and the
/// next snapshot, never kept as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: ServiceStatus,
    /// Round trip in milliseconds (0 when no probe ran).
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl HealthCheckResult {
    pub fn failed(response_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Error,
            response_time_ms,
            error: Some(error.into()),
            payload: None,
        }
    }
}
