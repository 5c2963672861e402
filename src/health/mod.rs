//! Service health subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (HTTP API / config file):
//!     → registry.rs (descriptor table, derived health address)
//!
//! Aggregator timer (aggregator.rs):
//!     → registry.check_all_services_health()
//!         → probe.rs (HTTP GET / transient WebSocket), all concurrent
//!         → outcome folded into each descriptor (state.rs statuses)
//!     → snapshot.rs (merged view)
//!     → broker broadcast as `health_status`
//! ```
//!
//! # Design Decisions
//! - Probes are bounded by one timeout and never retried inside a round
//! - Consecutive failures escalate to `ServiceUnavailable` at a threshold
//! - Standalone services are never probed; their status is self-reported

pub mod aggregator;
pub mod probe;
pub mod registry;
pub mod snapshot;
pub mod state;

pub use aggregator::HealthAggregator;
pub use registry::{ServiceDescriptor, ServiceRegistration, ServiceRegistry, ServiceUpdate};
pub use snapshot::HealthSnapshot;
pub use state::{HealthCheckResult, ServiceKind, ServiceStatus};
