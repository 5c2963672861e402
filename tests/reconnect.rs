//! Endpoint failure handling: heartbeat timeouts and backoff exhaustion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lightning_fabric::client::{ConnectionEndpoint, ConnectionState, EndpointEvent, EventKind};
use lightning_fabric::config::EndpointConfig;

mod common;

#[tokio::test]
async fn silent_peer_is_dropped_after_missed_pongs() {
    let peer = common::start_silent_peer().await;
    let config = EndpointConfig {
        ping_interval_ms: 50,
        reconnect_base_ms: 1_000,
        ..common::endpoint_config()
    };
    let endpoint = ConnectionEndpoint::new(&format!("ws://{peer}/"), config).unwrap();

    let errors: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&errors);
    endpoint.on(EventKind::Error, move |event| {
        if let EndpointEvent::Error { kind, .. } = event {
            seen.lock().unwrap().push(*kind);
        }
    });
    let reconnecting = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&reconnecting);
    endpoint.on(EventKind::Reconnecting, move |_| *counter.lock().unwrap() += 1);

    endpoint.connect().await.unwrap();
    assert_eq!(endpoint.state(), ConnectionState::Connected);

    assert!(
        endpoint
            .wait_for_state(ConnectionState::Reconnecting, Duration::from_secs(3))
            .await,
        "heartbeat timeout did not trigger a reconnect"
    );
    assert_eq!(errors.lock().unwrap().first().copied(), Some("timeout"));
    assert!(*reconnecting.lock().unwrap() >= 1);
    assert!(endpoint.stats().last_ping.is_some());
    assert!(endpoint.stats().last_pong.is_none());

    endpoint.close(1000, "done").await;
}

#[tokio::test]
async fn backoff_exhaustion_reports_one_terminal_error() {
    let port = common::closed_port();
    let config = EndpointConfig {
        reconnect_base_ms: 10,
        max_reconnect_attempts: 3,
        connect_timeout_ms: 1_000,
        ..common::endpoint_config()
    };
    let endpoint = ConnectionEndpoint::new(&format!("ws://127.0.0.1:{port}/ws"), config).unwrap();

    let delays: Arc<Mutex<Vec<(u32, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&delays);
    endpoint.on(EventKind::Reconnecting, move |event| {
        if let EndpointEvent::Reconnecting { attempt, delay } = event {
            seen.lock().unwrap().push((*attempt, *delay));
        }
    });
    let terminal = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&terminal);
    endpoint.on(EventKind::Error, move |event| {
        if let EndpointEvent::Error { terminal: true, .. } = event {
            *counter.lock().unwrap() += 1;
        }
    });

    assert!(endpoint.connect().await.is_err());
    assert!(common::wait_until(Duration::from_secs(5), || *terminal.lock().unwrap() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*terminal.lock().unwrap(), 1);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![
            (1, Duration::from_millis(10)),
            (2, Duration::from_millis(15)),
            (3, Duration::from_millis(22)),
        ]
    );
    assert_eq!(endpoint.state(), ConnectionState::Error);

    // The cycle is over, so a new connect starts a fresh one.
    assert!(endpoint.connect().await.is_err());
    endpoint.close(1000, "done").await;
}

#[tokio::test]
async fn endpoint_recovers_when_broker_comes_back() {
    let address = format!("127.0.0.1:{}", common::closed_port());
    let (broker, addr) = common::start_broker_at(&address, common::broker_config()).await;
    let config = EndpointConfig {
        reconnect_base_ms: 50,
        max_reconnect_attempts: 20,
        ..common::endpoint_config()
    };
    let endpoint =
        ConnectionEndpoint::with_id("phoenix", &common::ws_url(addr, "phoenix"), config).unwrap();

    let reconnects = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reconnects);
    endpoint.on(EventKind::Reconnect, move |event| {
        if let EndpointEvent::Reconnect { attempts } = event {
            seen.lock().unwrap().push(*attempts);
        }
    });

    endpoint.connect().await.unwrap();
    broker.stop().await;
    assert!(
        endpoint
            .wait_for_state(ConnectionState::Reconnecting, Duration::from_secs(3))
            .await
    );

    broker.start().await.unwrap();
    assert!(
        endpoint
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
            .await
    );
    assert!(common::wait_until(Duration::from_secs(2), || !reconnects.lock().unwrap().is_empty()).await);
    assert_eq!(endpoint.stats().reconnect_attempts, 0);

    endpoint.close(1000, "done").await;
    broker.stop().await;
}
