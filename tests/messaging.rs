//! Broker and endpoint working together over real sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use lightning_fabric::broker::server::ClientFilter;
use lightning_fabric::config::BrokerConfig;
use lightning_fabric::client::{ConnectionEndpoint, ConnectionState, EndpointEvent, EventKind, SendOutcome};
use lightning_fabric::net::ClientRecord;
use lightning_fabric::protocol::{ConnectionTest, Envelope};
use lightning_fabric::BrokerEvent;

mod common;

#[tokio::test]
async fn buffered_messages_arrive_in_order_after_connect() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;
    let mut events = broker.subscribe();

    let endpoint =
        ConnectionEndpoint::with_id("buffered", &common::ws_url(addr, "buffered"), common::endpoint_config())
            .unwrap();
    for seq in 0..3 {
        let outcome = endpoint
            .send(Envelope::domain("note", json!({ "seq": seq })).unwrap())
            .unwrap();
        assert_eq!(outcome, SendOutcome::Buffered { dropped_oldest: false });
    }
    assert_eq!(endpoint.stats().buffered, 3);

    endpoint.connect().await.unwrap();

    let mut received = Vec::new();
    let collected = tokio::time::timeout(Duration::from_secs(5), async {
        while received.len() < 3 {
            if let Ok(BrokerEvent::Message { client_id, envelope: Envelope::Domain(msg) }) =
                events.recv().await
            {
                assert_eq!(client_id, "buffered");
                received.push(msg.payload()["seq"].as_u64().unwrap());
            }
        }
    })
    .await;
    assert!(collected.is_ok(), "broker did not receive the buffered messages");
    assert_eq!(received, vec![0, 1, 2]);
    assert_eq!(broker.client("buffered").unwrap().messages_received, 3);
    assert_eq!(endpoint.stats().buffered, 0);

    endpoint.close(1000, "done").await;
    broker.stop().await;
}

#[tokio::test]
async fn filtered_broadcast_reaches_only_matching_clients() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;

    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut endpoints = Vec::new();
    for id in ["viewer-1", "viewer-2", "trader-1"] {
        let endpoint =
            ConnectionEndpoint::with_id(id, &common::ws_url(addr, id), common::endpoint_config()).unwrap();
        let hits = Arc::clone(&hits);
        let owner = id.to_string();
        endpoint.on_message("alert", move |_| hits.lock().unwrap().push(owner.clone()));
        endpoint.connect().await.unwrap();
        endpoints.push(endpoint);
    }
    assert!(common::wait_until(Duration::from_secs(5), || broker.client_count() == 3).await);

    let viewers_only = |client: &ClientRecord| client.id.starts_with("viewer");
    let filter: ClientFilter<'_> = &viewers_only;
    let delivered = broker.broadcast(
        &Envelope::domain("alert", json!({ "level": "warn" })).unwrap(),
        Some(filter),
    );
    assert_eq!(delivered, 2);

    assert!(common::wait_until(Duration::from_secs(5), || hits.lock().unwrap().len() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut hits = hits.lock().unwrap().clone();
    hits.sort();
    assert_eq!(hits, vec!["viewer-1", "viewer-2"]);

    for endpoint in endpoints {
        endpoint.close(1000, "done").await;
    }
    broker.stop().await;
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;
    assert_eq!(broker.start().await.unwrap(), addr);
    assert!(broker.is_running().await);

    broker.stop().await;
    broker.stop().await;
    assert!(!broker.is_running().await);
    assert!(broker.local_addr().await.is_none());
}

#[tokio::test]
async fn stop_closes_clients_with_normal_code() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;
    let endpoint =
        ConnectionEndpoint::with_id("closer", &common::ws_url(addr, "closer"), common::endpoint_config())
            .unwrap();
    let codes: Arc<Mutex<Vec<Option<u16>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&codes);
    endpoint.on(EventKind::Close, move |event| {
        if let EndpointEvent::Close { code, .. } = event {
            seen.lock().unwrap().push(*code);
        }
    });
    endpoint.connect().await.unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || broker.client_count() == 1).await);

    broker.stop().await;
    assert_eq!(broker.client_count(), 0);
    assert!(common::wait_until(Duration::from_secs(5), || !codes.lock().unwrap().is_empty()).await);
    assert_eq!(codes.lock().unwrap()[0], Some(1000));

    endpoint.close(1000, "done").await;
}

#[tokio::test]
async fn connection_test_is_echoed() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;
    let endpoint =
        ConnectionEndpoint::with_id("tester", &common::ws_url(addr, "tester"), common::endpoint_config())
            .unwrap();

    let echoed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&echoed);
    endpoint.on_message("connection_test_response", move |envelope| {
        if let Envelope::ConnectionTestResponse(response) = envelope {
            *slot.lock().unwrap() = Some(response.data.echo_data.clone());
        }
    });
    endpoint.connect().await.unwrap();
    endpoint
        .send(Envelope::ConnectionTest(ConnectionTest { data: json!({ "probe": 7 }) }))
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || echoed.lock().unwrap().is_some()).await);
    assert_eq!(echoed.lock().unwrap().clone(), Some(json!({ "probe": 7 })));

    endpoint.close(1000, "done").await;
    broker.stop().await;
}

#[tokio::test]
async fn relay_types_fan_out_to_every_client() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;

    let count = Arc::new(AtomicUsize::new(0));
    let mut endpoints = Vec::new();
    for id in ["a", "b"] {
        let endpoint =
            ConnectionEndpoint::with_id(id, &common::ws_url(addr, id), common::endpoint_config()).unwrap();
        let count = Arc::clone(&count);
        endpoint.on_message("channel_update", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        endpoint.connect().await.unwrap();
        endpoints.push(endpoint);
    }
    assert!(common::wait_until(Duration::from_secs(5), || broker.client_count() == 2).await);

    endpoints[0]
        .send(Envelope::domain("channel_update", json!({ "channel": "abc" })).unwrap())
        .unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || count.load(Ordering::SeqCst) == 2).await);

    for endpoint in endpoints {
        endpoint.close(1000, "done").await;
    }
    broker.stop().await;
}

#[tokio::test]
async fn duplicate_client_id_closes_older_connection() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;
    let url = common::ws_url(addr, "twin");

    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    match first.next().await {
        Some(Ok(Message::Text(text))) => assert!(text.as_str().contains("welcome")),
        other => panic!("expected welcome, got {other:?}"),
    }

    let (_second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(closed, Some(1000));
    assert!(common::wait_until(Duration::from_secs(5), || broker.client_count() == 1).await);

    broker.stop().await;
}

#[tokio::test]
async fn broker_terminates_client_that_never_answers_pings() {
    let config = BrokerConfig {
        ping_interval_ms: 50,
        ..common::broker_config()
    };
    let (broker, addr) = common::start_broker(config).await;
    let mut events = broker.subscribe();

    // Never polled, so no pong is ever written back.
    let (_mute, _) = tokio_tungstenite::connect_async(common::ws_url(addr, "mute").as_str())
        .await
        .unwrap();
    assert!(common::wait_until(Duration::from_secs(2), || broker.client_count() == 1).await);
    assert!(common::wait_until(Duration::from_secs(3), || broker.client_count() == 0).await);

    let summary = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(BrokerEvent::Disconnected(summary)) = events.recv().await {
                return summary;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(summary.id, "mute");
    assert!(summary.disconnected_at.is_some());
    assert!(!summary.alive);

    broker.stop().await;
}

#[tokio::test]
async fn endpoint_reaches_connected_state() {
    let (broker, addr) = common::start_broker(common::broker_config()).await;
    let endpoint = ConnectionEndpoint::new(&format!("ws://{addr}/ws"), common::endpoint_config()).unwrap();
    assert_eq!(endpoint.state(), ConnectionState::Disconnected);

    endpoint.connect().await.unwrap();
    assert_eq!(endpoint.state(), ConnectionState::Connected);
    // A second connect while active is a no-op.
    endpoint.connect().await.unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || broker.client_count() == 1).await);

    endpoint.close(1000, "done").await;
    assert_eq!(endpoint.state(), ConnectionState::ForceClosed);
    assert!(common::wait_until(Duration::from_secs(5), || broker.client_count() == 0).await);
    broker.stop().await;
}
