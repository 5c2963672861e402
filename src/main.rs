//! Lightning Fabric broker daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                 FABRIC DAEMON                 │
//!                      │                                               │
//!   WebSocket clients  │  ┌──────────┐   ┌────────────┐                │
//!   ◀─────────────────▶┼─▶│   net    │──▶│   broker   │◀─── broadcast ─┼──┐
//!                      │  │ listener │   │ (ws route) │                │  │
//!                      │  └──────────┘   └────────────┘                │  │
//!                      │        │                                      │  │
//!   Management API     │        ▼                                      │  │
//!   ◀─────────────────▶┼──  http (/services, /health, /clients)        │  │
//!                      │        │                                      │  │
//!                      │        ▼                                      │  │
//!                      │  ┌──────────────┐   ┌─────────────────┐       │  │
//!                      │  │   registry   │◀──│   aggregator    │───────┼──┘
//!                      │  │  + probes    │   │  (poll ticker)  │       │
//!                      │  └──────┬───────┘   └─────────────────┘       │
//!                      │         │                                     │
//!                      └─────────┼─────────────────────────────────────┘
//!                                ▼
//!                     node services (http / socket / standalone)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use lightning_fabric::config::watcher::ConfigWatcher;
use lightning_fabric::config::{load_config, FabricConfig};
use lightning_fabric::http::{api_router, ApiState};
use lightning_fabric::lifecycle::{wait_for_signal, Shutdown};
use lightning_fabric::observability::{logging, metrics};
use lightning_fabric::{ConnectionBroker, HealthAggregator, ServiceRegistry};

#[derive(Parser)]
#[command(name = "lightning-fabric")]
#[command(about = "WebSocket broker and service health aggregator", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "fabric.toml")]
    config: PathBuf,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (mut config, config_loaded) = if args.config.exists() {
        (load_config(&args.config)?, true)
    } else {
        (FabricConfig::default(), false)
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_tracing(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lightning-fabric starting");
    if !config_loaded {
        tracing::warn!(path = ?args.config, "Config file not found, using defaults");
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        ws_path = %config.broker.path,
        services = config.services.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(ServiceRegistry::new(config.health.clone()));
    let report = registry.sync_declared(&config.services);
    tracing::info!(registered = report.registered.len(), "Declared services loaded");

    let broker = ConnectionBroker::new(config.listener.clone(), config.broker.clone());
    let aggregator = HealthAggregator::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
        config.health.poll_interval(),
    );
    broker.mount(api_router(ApiState {
        registry: Arc::clone(&registry),
        broker: Arc::clone(&broker),
        aggregator: Arc::clone(&aggregator),
    }));

    let local_addr = broker.start().await?;
    tracing::info!(address = %local_addr, "Broker listening");

    let shutdown = Shutdown::new();

    let aggregator_task = if config.health.enabled {
        Some(tokio::spawn(Arc::clone(&aggregator).run(shutdown.token())))
    } else {
        tracing::info!("Health aggregator disabled");
        None
    };

    // Keep the watcher handle alive for the process lifetime.
    let _watcher = if config_loaded {
        let (watcher, mut updates) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(handle) => {
                let registry = Arc::clone(&registry);
                let token = shutdown.token();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            update = updates.recv() => {
                                let Some(new_config) = update else { break };
                                let report = registry.sync_declared(&new_config.services);
                                tracing::info!(
                                    registered = ?report.registered,
                                    removed = ?report.removed,
                                    "Declared services reloaded"
                                );
                            }
                        }
                    }
                });
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Config hot reload unavailable");
                None
            }
        }
    } else {
        None
    };

    wait_for_signal().await;
    tracing::info!("Shutdown signal received");

    shutdown.trigger();
    if let Some(task) = aggregator_task {
        let _ = task.await;
    }
    broker.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
