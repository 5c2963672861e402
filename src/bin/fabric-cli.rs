use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use lightning_fabric::client::{ConnectionEndpoint, EndpointEvent, EventKind};
use lightning_fabric::config::EndpointConfig;
use lightning_fabric::health::ServiceKind;
use lightning_fabric::lifecycle::wait_for_signal;
use lightning_fabric::Envelope;

#[derive(Parser)]
#[command(name = "fabric-cli")]
#[command(about = "Management CLI for the Lightning Fabric broker", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8768")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check broker status
    Status,
    /// List registered services
    Services,
    /// Probe every service and print the snapshot
    Health,
    /// List connected WebSocket clients
    Clients,
    /// Register (or replace) a service
    Register {
        id: String,
        #[arg(long, value_enum, default_value = "http")]
        kind: KindArg,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        health_check: Option<String>,
    },
    /// Remove a service
    Deregister { id: String },
    /// Probe one service
    Check { id: String },
    /// Stream health snapshots from the broker until interrupted
    Watch {
        #[arg(long, default_value = "/ws")]
        path: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum KindArg {
    Http,
    Socket,
    Standalone,
}

impl From<KindArg> for ServiceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Http => ServiceKind::Http,
            KindArg::Socket => ServiceKind::Socket,
            KindArg::Standalone => ServiceKind::Standalone,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{base}/health")).send().await?;
            print_response(res).await?;
        }
        Commands::Services => {
            let res = client.get(format!("{base}/services")).send().await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client.get(format!("{base}/health/services")).send().await?;
            print_response(res).await?;
        }
        Commands::Clients => {
            let res = client.get(format!("{base}/clients")).send().await?;
            print_response(res).await?;
        }
        Commands::Register {
            id,
            kind,
            port,
            host,
            name,
            health_check,
        } => {
            let body = json!({
                "id": id,
                "name": name,
                "kind": ServiceKind::from(kind),
                "host": host,
                "port": port,
                "health_check": health_check,
            });
            let res = client
                .post(format!("{base}/services"))
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Deregister { id } => {
            let res = client.delete(format!("{base}/services/{id}")).send().await?;
            if res.status().is_success() {
                println!("Deregistered {id}");
            } else {
                print_response(res).await?;
            }
        }
        Commands::Check { id } => {
            let res = client
                .post(format!("{base}/services/{id}/check"))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Watch { path } => watch(base, &path).await?,
    }

    Ok(())
}

async fn watch(base: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ws_base = base
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    let endpoint = ConnectionEndpoint::new(&format!("{ws_base}{path}"), EndpointConfig::default())?;

    let _messages = endpoint.on(EventKind::Message, |event| {
        if let EndpointEvent::Message(Envelope::HealthStatus(snapshot)) = event {
            match serde_json::to_string_pretty(snapshot) {
                Ok(text) => println!("{text}"),
                Err(e) => eprintln!("Error: {e}"),
            }
        }
    });
    let _errors = endpoint.on(EventKind::Error, |event| {
        if let EndpointEvent::Error { message, terminal, .. } = event {
            eprintln!("Error: {message}");
            if *terminal {
                eprintln!("Giving up");
            }
        }
    });
    let _reconnecting = endpoint.on(EventKind::Reconnecting, |event| {
        if let EndpointEvent::Reconnecting { attempt, delay } = event {
            eprintln!("Reconnecting (attempt {attempt}) in {}ms", delay.as_millis());
        }
    });

    if let Err(e) = endpoint.connect().await {
        eprintln!("Error: {e}");
    }
    wait_for_signal().await;
    endpoint.close(1000, "watch finished").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
