//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     config → logging → metrics → registry (declared services)
//!     → broker start (fatal on bind failure) → aggregator → config watcher
//!
//! Shutdown (shutdown.rs):
//!     signals.rs (SIGINT / SIGTERM) → trigger → cancel aggregator
//!     → broker.stop() (close clients with 1000, stop listener)
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
