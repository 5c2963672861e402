//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Broker start
//!     → listener.rs (bind, fatal on failure)
//!     → axum serve (HTTP API + WebSocket upgrade)
//!     → connection.rs (per-client record, outbound queue, liveness flag)
//! ```
//!
//! # Design Decisions
//! - Each client's writes go through one bounded queue so frames from the
//!   reader, the liveness timer and broadcasts never interleave mid-frame
//! - A client's timers share one cancellation token

pub mod connection;
pub mod listener;

pub use connection::{ClientRecord, ClientSummary, Outbound};
