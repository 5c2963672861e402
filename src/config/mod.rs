//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FabricConfig (validated, immutable)
//!     → cloned into each subsystem at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → declared services re-synced into the registry
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only the declared service list is applied on reload; timers and the
//!   listener keep their startup values

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BrokerConfig, EndpointConfig, FabricConfig, HealthConfig, ListenerConfig,
    ObservabilityConfig, ServiceConfig,
};
