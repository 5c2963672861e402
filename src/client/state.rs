//! Endpoint connection states.
//!
//! ```text
//! disconnected → connecting → connected → {closing, error} → reconnecting
//!                    ↑                                            │
//!                    └────────────────────────────────────────────┘
//! any state ── close() ──→ force_closed (terminal until reconnect())
//! ```

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Error,
    Reconnecting,
    ForceClosed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ForceClosed => "force_closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::ForceClosed).unwrap(),
            "\"force_closed\""
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
