//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint connect attempt / health probe:
//!     → timeouts.rs (enforce connect / probe bound)
//!     → On endpoint failure: backoff.rs (next reconnect delay, attempt cap)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - One canonical backoff policy: factor 1.5, capped at 30s, no jitter

pub mod backoff;
pub mod timeouts;

pub use backoff::{reconnect_delay, Backoff};
pub use timeouts::with_timeout;
