//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level so a running deployment can be
//! made chattier without editing the config file.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

fn default_directive(level: &str) -> String {
    format!("lightning_fabric={level},tower_http=info")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_crate() {
        assert_eq!(
            default_directive("debug"),
            "lightning_fabric=debug,tower_http=info"
        );
    }
}
