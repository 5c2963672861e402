//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use lightning_fabric::config::{BrokerConfig, EndpointConfig, ListenerConfig};
use lightning_fabric::ConnectionBroker;

/// Start a programmable HTTP backend on an ephemeral port. Every request is
/// answered with the `(status, body)` the closure returns.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Request headers fit in one read for these probes.
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend that always answers with the same status and body.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (status, body.to_string()) }).await
}

/// A WebSocket peer that completes the handshake and then never reads or
/// writes again, so heartbeats go unanswered.
pub async fn start_silent_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(socket).await {
                held.push(ws);
            }
        }
    });

    addr
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn broker_config() -> BrokerConfig {
    BrokerConfig {
        close_timeout_ms: 500,
        ..BrokerConfig::default()
    }
}

pub fn endpoint_config() -> EndpointConfig {
    EndpointConfig {
        ping_interval_ms: 60_000,
        connect_timeout_ms: 2_000,
        reconnect_base_ms: 20,
        max_reconnect_attempts: 5,
        max_buffered_messages: 50,
    }
}

/// Start a broker on an ephemeral local port.
pub async fn start_broker(config: BrokerConfig) -> (Arc<ConnectionBroker>, SocketAddr) {
    start_broker_at("127.0.0.1:0", config).await
}

/// Start a broker on a fixed address, so a restart binds the same port.
pub async fn start_broker_at(
    address: &str,
    config: BrokerConfig,
) -> (Arc<ConnectionBroker>, SocketAddr) {
    let listener = ListenerConfig {
        bind_address: address.to_string(),
        ..ListenerConfig::default()
    };
    let broker = ConnectionBroker::new(listener, config);
    let addr = broker.start().await.unwrap();
    (broker, addr)
}

pub fn ws_url(addr: SocketAddr, client_id: &str) -> String {
    format!("ws://{addr}/ws?client_id={client_id}")
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
