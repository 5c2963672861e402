//! Connection endpoint (client role).
//!
//! # Data Flow
//! ```text
//! send()
//!     → connected: writer channel → WebSocket
//!     → otherwise: bounded buffer (drop-oldest)
//!
//! driver task (endpoint.rs):
//!     connect (timeout) → attach writer, flush buffer → session loop
//!         heartbeat ping every interval, pong deadline 3× interval
//!         inbound envelopes → events.rs subscribers
//!     session ends → detach writer → backoff → connect …
//!     attempts exhausted → terminal error event, once
//! ```

pub mod endpoint;
pub mod events;
pub mod registry;
pub mod state;

pub use endpoint::{ConnectionEndpoint, EndpointStats, SendOutcome};
pub use events::{EndpointEvent, EventKind, Subscription};
pub use registry::EndpointRegistry;
pub use state::ConnectionState;
