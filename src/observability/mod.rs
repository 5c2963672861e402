//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint, broker, registry, aggregator:
//!     → logging.rs (structured tracing events, pretty or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape (when enabled)
//! ```
//!
//! # Design Decisions
//! - Structured fields over formatted strings
//! - Metrics are cheap (atomic increments) and safe to call without a recorder

pub mod logging;
pub mod metrics;
