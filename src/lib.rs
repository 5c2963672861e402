//! Lightning Fabric
//!
//! Real-time messaging fabric for a multi-service node deployment: a
//! WebSocket broker that fans messages out to connected clients, a
//! reconnecting client endpoint, and a registry of services whose health
//! is probed and pushed to every viewer.

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod resilience;

pub use broker::{BrokerEvent, ConnectionBroker};
pub use client::{ConnectionEndpoint, ConnectionState, EndpointEvent, EventKind};
pub use config::FabricConfig;
pub use error::{FabricError, Result};
pub use health::{HealthAggregator, ServiceRegistry};
pub use lifecycle::Shutdown;
pub use protocol::Envelope;
