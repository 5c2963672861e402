//! Error taxonomy shared by the endpoint, broker and health subsystems.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the messaging fabric.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Transport-level failure (socket, WebSocket handshake, HTTP client).
    #[error("network error: {0}")]
    Network(String),

    /// A connection attempt or probe exceeded its bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Non-JSON or malformed payload.
    #[error("parse error: {0}")]
    Parse(String),

    /// A health endpoint answered with a non-2xx status.
    #[error("unhealthy response: HTTP {0}")]
    Status(u16),

    /// A probe has failed repeatedly.
    #[error("service {service} unavailable after {failures} consecutive failures: {message}")]
    ServiceUnavailable {
        service: String,
        failures: u32,
        message: String,
    },

    /// Unknown service or client id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The connection was force-closed and will not be used again.
    #[error("connection closed")]
    Closed,

    /// The listener could not be bound. Fatal at startup.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FabricError {
    /// Short machine-readable classification, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FabricError::Network(_) => "network",
            FabricError::Timeout(_) => "timeout",
            FabricError::Parse(_) => "parse",
            FabricError::Status(_) => "http_status",
            FabricError::ServiceUnavailable { .. } => "service_unavailable",
            FabricError::NotFound(_) => "not_found",
            FabricError::Closed => "closed",
            FabricError::Bind { .. } => "bind",
            FabricError::Internal(_) => "internal",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FabricError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FabricError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(e: serde_json::Error) -> Self {
        FabricError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(FabricError::Network("x".into()).kind(), "network");
        assert_eq!(FabricError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(FabricError::Closed.kind(), "closed");
    }

    #[test]
    fn service_unavailable_message_mentions_failures() {
        let err = FabricError::ServiceUnavailable {
            service: "lnd".into(),
            failures: 3,
            message: "connection refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("lnd"));
        assert!(text.contains("3 consecutive"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn json_errors_become_parse_errors() {
        let err: FabricError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "parse");
    }
}
