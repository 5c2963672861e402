//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, addresses parse)
//! - Detect duplicate declared services
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FabricConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::FabricConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &FabricConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_message_bytes == 0 {
        errors.push(ValidationError::new("listener.max_message_bytes", "must be > 0"));
    }

    if !config.broker.path.starts_with('/') {
        errors.push(ValidationError::new("broker.path", "must start with '/'"));
    }
    if config.broker.ping_interval_ms == 0 {
        errors.push(ValidationError::new("broker.ping_interval_ms", "must be > 0"));
    }
    if config.broker.client_queue == 0 {
        errors.push(ValidationError::new("broker.client_queue", "must be > 0"));
    }

    let endpoint = &config.endpoint;
    if endpoint.ping_interval_ms == 0 {
        errors.push(ValidationError::new("endpoint.ping_interval_ms", "must be > 0"));
    }
    if endpoint.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("endpoint.connect_timeout_ms", "must be > 0"));
    }
    if endpoint.reconnect_base_ms == 0 {
        errors.push(ValidationError::new("endpoint.reconnect_base_ms", "must be > 0"));
    }
    if endpoint.max_buffered_messages == 0 {
        errors.push(ValidationError::new("endpoint.max_buffered_messages", "must be > 0"));
    }

    if config.health.poll_interval_secs == 0 {
        errors.push(ValidationError::new("health.poll_interval_secs", "must be > 0"));
    }
    if config.health.timeout_ms == 0 {
        errors.push(ValidationError::new("health.timeout_ms", "must be > 0"));
    }
    if config.health.unhealthy_threshold == 0 {
        errors.push(ValidationError::new("health.unhealthy_threshold", "must be > 0"));
    }

    let mut seen = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if service.id.trim().is_empty() {
            errors.push(ValidationError::new(format!("services[{i}].id"), "must not be empty"));
        } else if !seen.insert(service.id.as_str()) {
            errors.push(ValidationError::new(
                format!("services[{i}].id"),
                format!("duplicate service id `{}`", service.id),
            ));
        }
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "expected \"pretty\" or \"json\"",
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
