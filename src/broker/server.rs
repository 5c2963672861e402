//! WebSocket broker server.
//!
//! # Responsibilities
//! - Bind the listener and serve the WebSocket upgrade plus mounted routes
//! - Keep the client table, one `ClientRecord` per live connection
//! - Unicast and filtered broadcast
//! - Close every client with 1000 before the listener shuts down

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::broker::liveness::{run_liveness, LivenessResult};
use crate::broker::BrokerEvent;
use crate::config::{BrokerConfig, ListenerConfig};
use crate::error::{FabricError, Result};
use crate::net::{listener, ClientRecord, ClientSummary, Outbound};
use crate::observability::metrics;
use crate::protocol::{ConnectionTestResponse, Envelope, IntoWire, Welcome};

/// `sender` stamped on heartbeats originating from the broker.
pub const BROKER_SENDER: &str = "broker";

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

const EVENT_CAPACITY: usize = 1024;
const MAX_CLIENT_ID_LEN: usize = 128;
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Predicate applied to each client during a broadcast.
pub type ClientFilter<'a> = &'a (dyn Fn(&ClientRecord) -> bool + Send + Sync);

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    client_id: Option<String>,
}

/// Accepts endpoint connections and routes messages between them.
pub struct ConnectionBroker {
    listener: ListenerConfig,
    config: BrokerConfig,
    clients: DashMap<String, Arc<ClientRecord>>,
    events: broadcast::Sender<BrokerEvent>,
    extra_routes: parking_lot::Mutex<Option<Router>>,
    running: tokio::sync::Mutex<Option<Running>>,
    started_at: Instant,
}

impl ConnectionBroker {
    pub fn new(listener: ListenerConfig, config: BrokerConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            listener,
            config,
            clients: DashMap::new(),
            events,
            extra_routes: parking_lot::Mutex::new(None),
            running: tokio::sync::Mutex::new(None),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Serve `router` on the broker's listener. Takes effect on the next
    /// `start()`.
    pub fn mount(&self, router: Router) {
        let mut routes = self.extra_routes.lock();
        *routes = Some(match routes.take() {
            Some(existing) => existing.merge(router),
            None => router,
        });
    }

    /// Bind and serve. Returns the bound address; calling again while
    /// running returns the same address without rebinding.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            tracing::debug!(address = %running.addr, "Broker already running");
            return Ok(running.addr);
        }

        let tcp = listener::bind(&self.listener.bind_address).await?;
        let addr = tcp.local_addr().map_err(|source| FabricError::Bind {
            address: self.listener.bind_address.clone(),
            source,
        })?;

        let app = self.router();
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(
                tcp,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Broker server error");
            }
        });

        tracing::info!(address = %addr, path = %self.config.path, "Broker started");
        *running = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Close every client with 1000, then stop the listener. Resolves once
    /// the serve task has finished. No-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let clients = self.snapshot();
        tracing::info!(clients = clients.len(), "Broker stopping");
        for client in &clients {
            client.close(CLOSE_NORMAL, "server shutdown");
        }

        if !self.drain(self.config.close_timeout()).await {
            let stragglers = self.snapshot();
            tracing::warn!(
                clients = stragglers.len(),
                "Clients did not acknowledge close in time, terminating"
            );
            for client in &stragglers {
                client.terminate();
            }
            self.drain(self.config.close_timeout()).await;
        }

        running.shutdown.cancel();
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "Broker serve task failed");
        }
        tracing::info!(address = %running.addr, "Broker stopped");
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Summaries of connected clients, oldest first.
    pub fn clients(&self) -> Vec<ClientSummary> {
        let mut clients: Vec<ClientSummary> =
            self.snapshot().iter().map(|c| c.summary()).collect();
        clients.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        clients
    }

    pub fn client(&self, id: &str) -> Option<ClientSummary> {
        self.clients.get(id).map(|c| c.summary())
    }

    /// Send to one client. False when the id is unknown or the client is
    /// no longer open.
    pub fn send_to_client(&self, id: &str, message: impl IntoWire) -> bool {
        let Some(client) = self.clients.get(id).map(|c| Arc::clone(c.value())) else {
            tracing::debug!(client_id = %id, "Send to unknown client");
            return false;
        };
        if !client.is_open() {
            return false;
        }
        let sent = client.send(message);
        if sent {
            metrics::record_message("out", "unicast");
        }
        sent
    }

    /// Send to every open client matching `filter`. Returns how many
    /// clients the message was queued for.
    pub fn broadcast(&self, message: impl IntoWire, filter: Option<ClientFilter<'_>>) -> usize {
        let text = match message.into_wire() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        for client in self.snapshot() {
            if !client.is_open() {
                continue;
            }
            if let Some(accept) = filter {
                if !accept(client.as_ref()) {
                    continue;
                }
            }
            if client.send(text.as_str()) {
                delivered += 1;
            }
        }

        metrics::record_broadcast(delivered);
        tracing::trace!(recipients = delivered, "Broadcast sent");
        delivered
    }

    fn snapshot(&self) -> Vec<Arc<ClientRecord>> {
        self.clients.iter().map(|e| Arc::clone(e.value())).collect()
    }

    async fn drain(&self, bound: Duration) -> bool {
        time::timeout(bound, async {
            while !self.clients.is_empty() {
                time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok()
    }

    fn router(self: &Arc<Self>) -> Router {
        let ws = Router::new()
            .route(&self.config.path, get(ws_handler))
            .with_state(Arc::clone(self));
        let app = match self.extra_routes.lock().clone() {
            Some(extra) => ws.merge(extra),
            None => ws,
        };
        app.layer(TraceLayer::new_for_http())
    }

    async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        remote: SocketAddr,
        requested_id: Option<String>,
    ) {
        let id = requested_id
            .filter(|id| is_valid_client_id(id))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (tx, mut rx) = mpsc::channel(self.config.client_queue);
        let cancel = CancellationToken::new();
        let record = Arc::new(ClientRecord::new(id.clone(), remote, tx, cancel.clone()));

        if let Some(previous) = self.clients.insert(id.clone(), Arc::clone(&record)) {
            tracing::warn!(client_id = %id, "Duplicate client id, replacing older connection");
            previous.close(CLOSE_NORMAL, "replaced by a newer connection");
        }
        metrics::record_clients_connected(self.clients.len());
        tracing::info!(client_id = %id, remote = %remote, "Client connected");

        let (mut sink, mut stream) = socket.split();

        let writer_cancel = cancel.clone();
        let mut writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    frame = rx.recv() => {
                        let message = match frame {
                            Some(Outbound::Text(text)) => Message::Text(text.into()),
                            Some(Outbound::Ping) => Message::Ping(Bytes::new()),
                            Some(Outbound::Close { code, reason }) => {
                                let frame = CloseFrame { code, reason: reason.into() };
                                let _ = sink.send(Message::Close(Some(frame))).await;
                                break;
                            }
                            None => break,
                        };
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    () = writer_cancel.cancelled() => break,
                }
            }
            let _ = sink.close().await;
        });

        record.send(&Envelope::Welcome(Welcome {
            client_id: id.clone(),
            server_time: Utc::now(),
            message: "connected to lightning-fabric broker".to_string(),
        }));
        let _ = self.events.send(BrokerEvent::Connected(record.summary()));

        let liveness = {
            let record = Arc::clone(&record);
            let cancel = cancel.clone();
            let interval = self.config.ping_interval();
            tokio::spawn(async move {
                let result = run_liveness(Arc::clone(&record), interval, BROKER_SENDER, cancel.clone()).await;
                if result == LivenessResult::TimedOut {
                    tracing::warn!(client_id = %record.id, "Client missed liveness check, terminating");
                    cancel.cancel();
                }
            })
        };

        let mut writer_done = false;
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&record, text.as_str()),
                    Some(Ok(Message::Pong(_))) => record.mark_alive(),
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(client_id = %id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(client_id = %id, frame = ?frame, "Client sent close");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(client_id = %id, error = %e, "Receive error");
                        break;
                    }
                    None => break,
                },
                _ = &mut writer => {
                    writer_done = true;
                    break;
                }
                () = cancel.cancelled() => break,
            }
        }

        // Let a queued close frame go out before tearing the writer down.
        if !writer_done && time::timeout(self.config.close_timeout(), &mut writer).await.is_err() {
            writer.abort();
        }
        cancel.cancel();
        let _ = liveness.await;

        self.cleanup(&record);
    }

    fn handle_text(&self, client: &Arc<ClientRecord>, text: &str) {
        client.record_received();

        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(client_id = %client.id, error = %e, "Dropping malformed message");
                return;
            }
        };
        metrics::record_message("in", envelope.message_type());

        match &envelope {
            Envelope::Ping(heartbeat) => {
                client.mark_alive();
                client.send(&Envelope::pong_for(heartbeat, BROKER_SENDER));
            }
            Envelope::Pong(_) => client.mark_alive(),
            Envelope::ConnectionTest(test) => {
                client.send(&Envelope::ConnectionTestResponse(ConnectionTestResponse::echo(
                    test.data.clone(),
                )));
            }
            Envelope::Domain(message)
                if self.config.relay_types.iter().any(|t| t == message.kind()) =>
            {
                let recipients = self.broadcast(&envelope, None);
                tracing::debug!(
                    client_id = %client.id,
                    message_type = message.kind(),
                    recipients,
                    "Relayed message"
                );
            }
            Envelope::Domain(message) => {
                tracing::debug!(
                    client_id = %client.id,
                    message_type = message.kind(),
                    "Unhandled message type"
                );
            }
            other => {
                tracing::debug!(
                    client_id = %client.id,
                    message_type = other.message_type(),
                    "Ignoring server-bound reserved message"
                );
            }
        }

        let _ = self.events.send(BrokerEvent::Message {
            client_id: client.id.clone(),
            envelope,
        });
    }

    /// Remove the record unless a newer connection already took its id.
    fn cleanup(&self, record: &Arc<ClientRecord>) {
        let removed = self
            .clients
            .remove_if(&record.id, |_, current| Arc::ptr_eq(current, record))
            .is_some();
        metrics::record_clients_connected(self.clients.len());

        let mut summary = record.summary();
        summary.disconnected_at = Some(Utc::now());
        tracing::info!(
            client_id = %record.id,
            sent = summary.messages_sent,
            received = summary.messages_received,
            replaced = !removed,
            "Client disconnected"
        );
        let _ = self.events.send(BrokerEvent::Disconnected(summary));
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broker): State<Arc<ConnectionBroker>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let max = broker.listener.max_message_bytes;
    ws.max_message_size(max)
        .on_upgrade(move |socket| broker.handle_socket(socket, remote, params.client_id))
}

fn is_valid_client_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_CLIENT_ID_LEN && !id.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> Arc<ConnectionBroker> {
        ConnectionBroker::new(
            ListenerConfig {
                bind_address: "127.0.0.1:0".to_string(),
                ..ListenerConfig::default()
            },
            BrokerConfig::default(),
        )
    }

    fn attach(broker: &ConnectionBroker, id: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(8);
        let record = ClientRecord::new(
            id.to_string(),
            "127.0.0.1:9".parse().unwrap(),
            tx,
            CancellationToken::new(),
        );
        broker.clients.insert(id.to_string(), Arc::new(record));
        rx
    }

    #[test]
    fn client_ids_are_validated() {
        assert!(is_valid_client_id("dashboard-1"));
        assert!(!is_valid_client_id(""));
        assert!(!is_valid_client_id("a\nb"));
        assert!(!is_valid_client_id(&"x".repeat(200)));
    }

    #[test]
    fn send_to_unknown_client_is_false() {
        assert!(!broker().send_to_client("ghost", "{}"));
    }

    #[tokio::test]
    async fn broadcast_counts_matching_clients() {
        let broker = broker();
        let _a = attach(&broker, "viewer-a");
        let _b = attach(&broker, "viewer-b");
        let _c = attach(&broker, "engine");

        let only_viewers: ClientFilter<'_> = &|c: &ClientRecord| c.id.starts_with("viewer");
        assert_eq!(broker.broadcast("{\"type\":\"x\"}", Some(only_viewers)), 2);
        assert_eq!(broker.broadcast("{\"type\":\"x\"}", None), 3);
    }

    #[tokio::test]
    async fn broadcast_skips_closed_clients() {
        let broker = broker();
        let _a = attach(&broker, "a");
        drop(attach(&broker, "b"));
        assert_eq!(broker.broadcast("{}", None), 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_replacement() {
        let broker = broker();
        let _old_rx = attach(&broker, "dup");
        let old = broker.clients.get("dup").map(|c| Arc::clone(c.value())).unwrap();
        let _new_rx = attach(&broker, "dup");

        broker.cleanup(&old);
        assert_eq!(broker.client_count(), 1);
        let current = broker.clients.get("dup").map(|c| Arc::clone(c.value())).unwrap();
        assert!(!Arc::ptr_eq(&current, &old));
    }

    #[tokio::test]
    async fn connection_test_is_echoed() {
        let broker = broker();
        let mut rx = attach(&broker, "tester");
        let client = broker.clients.get("tester").map(|c| Arc::clone(c.value())).unwrap();

        broker.handle_text(&client, r#"{"type":"connection_test","data":{"n":1}}"#);
        match rx.recv().await.unwrap() {
            Outbound::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "connection_test_response");
                assert_eq!(value["data"]["echo_data"]["n"], 1);
                assert!(value["data"]["received_at"].is_string());
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(client.messages_received(), 1);
    }

    #[tokio::test]
    async fn legacy_heartbeat_gets_heartbeat_response() {
        let broker = broker();
        let mut rx = attach(&broker, "legacy");
        let client = broker.clients.get("legacy").map(|c| Arc::clone(c.value())).unwrap();

        broker.handle_text(
            &client,
            r#"{"type":"heartbeat","timestamp":"2024-01-01T00:00:00","client_id":"test-client"}"#,
        );
        match rx.recv().await.unwrap() {
            Outbound::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "heartbeat_response");
                assert_eq!(value["sender"], BROKER_SENDER);
            }
            other => panic!("unexpected frame {other:?}"),
        }

        broker.handle_text(&client, r#"{"type":"ping","sender":"dash"}"#);
        match rx.recv().await.unwrap() {
            Outbound::Text(text) => assert!(text.contains(r#""type":"pong""#)),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn relay_types_reach_everyone() {
        let broker = broker();
        let mut a = attach(&broker, "a");
        let mut b = attach(&broker, "b");
        let sender = broker.clients.get("a").map(|c| Arc::clone(c.value())).unwrap();

        broker.handle_text(&sender, r#"{"type":"channel_update","channel":"abc"}"#);
        for rx in [&mut a, &mut b] {
            assert!(matches!(rx.recv().await.unwrap(), Outbound::Text(t) if t.contains("channel_update")));
        }

        broker.handle_text(&sender, r#"{"type":"custom_thing"}"#);
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_messages_are_counted_and_dropped() {
        let broker = broker();
        let mut events = broker.subscribe();
        let _rx = attach(&broker, "a");
        let client = broker.clients.get("a").map(|c| Arc::clone(c.value())).unwrap();

        broker.handle_text(&client, "not json");
        broker.handle_text(&client, r#"{"type":""}"#);
        assert_eq!(client.messages_received(), 2);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let broker = broker();
        broker.stop().await;
        assert!(!broker.is_running().await);
    }
}
