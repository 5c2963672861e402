//! Wire protocol shared by endpoints and the broker.
//!
//! # Data Flow
//! ```text
//! text frame
//!     → envelope.rs (JSON object, mandatory `type`)
//!     → reserved types decoded into typed variants
//!     → everything else kept as an opaque DomainMessage
//! ```
//!
//! Frames that are not JSON objects, or whose `type` is missing or
//! malformed, are rejected with `FabricError::Parse` and never dispatched.

pub mod envelope;

pub use envelope::{
    ConnectionTest, ConnectionTestEcho, ConnectionTestResponse, DomainMessage, Envelope, Heartbeat, IntoWire, Welcome,
};
