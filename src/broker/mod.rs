//! Connection broker (server role).
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade at broker.path
//!     → server.rs (assign id, store ClientRecord, send welcome)
//!     → liveness.rs (per-client ping timer)
//!     → inbound frames: parse envelope → answer ping / echo connection_test /
//!       relay domain types → BrokerEvent::Message
//!     → transport closed: remove record → BrokerEvent::Disconnected
//!
//! Outbound:
//!     send_to_client / broadcast
//!     → ClientRecord queue → per-client write task
//! ```
//!
//! # Design Decisions
//! - The client table is only iterated through snapshots
//! - Observers (aggregator, tests) follow the broker through a broadcast
//!   channel of `BrokerEvent`s instead of callbacks

pub mod liveness;
pub mod server;

pub use server::ConnectionBroker;

use crate::net::ClientSummary;
use crate::protocol::Envelope;

/// Lifecycle and traffic notifications published by the broker.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Connected(ClientSummary),
    Message {
        client_id: String,
        envelope: Envelope,
    },
    /// Carries the final counters and the disconnect time.
    Disconnected(ClientSummary),
}
