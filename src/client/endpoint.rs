//! Resilient WebSocket endpoint (client role).
//!
//! # Responsibilities
//! - Connect with a bounded timeout and reconnect with exponential backoff
//! - Detect dead peers with application heartbeats
//! - Buffer outbound messages while disconnected and flush them in order
//! - Publish lifecycle and message events to subscribers
//!
//! # Design Decisions
//! - One driver task per connect cycle owns the transport; `close()` and
//!   `reconnect()` cancel it and wait for it to finish, so there is never
//!   more than one live transport per endpoint
//! - The outbound sender and the buffer sit behind one lock: a connection
//!   only becomes writable after the buffer has been moved onto it
//! - Messages queued on a transport that died before writing them go back
//!   to the front of the buffer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::client::events::{EndpointEvent, EventKind, HandlerTable, Subscription};
use crate::client::state::ConnectionState;
use crate::config::EndpointConfig;
use crate::error::{FabricError, Result};
use crate::observability::metrics;
use crate::protocol::{Envelope, Heartbeat, IntoWire};
use crate::resilience::{with_timeout, Backoff};

type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pong deadline, in heartbeat intervals.
const PONG_TIMEOUT_INTERVALS: u32 = 3;

/// How long a cancelled driver gets to write its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// What `send` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the live transport.
    Sent,
    /// Kept for the next connection. `dropped_oldest` is set when the buffer
    /// was full and its oldest message was discarded.
    Buffered { dropped_oldest: bool },
}

/// Point-in-time view of an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub id: String,
    pub target: String,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub buffered: usize,
    pub dropped: u64,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
}

enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Default)]
struct Outbox {
    sender: Option<mpsc::UnboundedSender<Frame>>,
    buffer: VecDeque<String>,
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Cancelled,
    /// `close()` asked for the transport to be shut.
    LocalClose,
    RemoteClose { code: Option<u16>, reason: String },
    Failed(FabricError),
}

struct Inner {
    id: String,
    config: EndpointConfig,
    target: Mutex<Url>,
    state: watch::Sender<ConnectionState>,
    outbox: Mutex<Outbox>,
    handlers: Arc<HandlerTable>,
    driver: tokio::sync::Mutex<Option<Driver>>,
    attempts: AtomicU32,
    dropped: AtomicU64,
    force_closed: AtomicBool,
    terminal_reported: AtomicBool,
    last_ping: Mutex<Option<DateTime<Utc>>>,
    last_pong: Mutex<Option<DateTime<Utc>>>,
}

/// One resilient connection to a remote broker.
///
/// Cheap to clone; clones share the connection. The driver task keeps the
/// endpoint alive until [`ConnectionEndpoint::close`] is called.
#[derive(Clone)]
pub struct ConnectionEndpoint {
    inner: Arc<Inner>,
}

impl ConnectionEndpoint {
    /// Create a disconnected endpoint with a generated id.
    pub fn new(target: &str, config: EndpointConfig) -> Result<Self> {
        Self::with_id(Uuid::new_v4().to_string(), target, config)
    }

    pub fn with_id(id: impl Into<String>, target: &str, config: EndpointConfig) -> Result<Self> {
        let target = parse_target(target)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                id: id.into(),
                config,
                target: Mutex::new(target),
                state,
                outbox: Mutex::new(Outbox::default()),
                handlers: HandlerTable::new(),
                driver: tokio::sync::Mutex::new(None),
                attempts: AtomicU32::new(0),
                dropped: AtomicU64::new(0),
                force_closed: AtomicBool::new(false),
                terminal_reported: AtomicBool::new(false),
                last_ping: Mutex::new(None),
                last_pong: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn target(&self) -> String {
        self.inner.target.lock().to_string()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the endpoint reaches `state`. False on timeout.
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.state_changes();
        let reached = matches!(
            time::timeout(timeout, rx.wait_for(|current| *current == state)).await,
            Ok(Ok(_))
        );
        reached
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            id: self.inner.id.clone(),
            target: self.target(),
            state: self.state(),
            reconnect_attempts: self.inner.attempts.load(Ordering::Relaxed),
            buffered: self.inner.outbox.lock().buffer.len(),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            last_ping: *self.inner.last_ping.lock(),
            last_pong: *self.inner.last_pong.lock(),
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&EndpointEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.on(kind, handler)
    }

    /// Subscribe to one domain message type.
    pub fn on_message<F>(&self, message_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.handlers.on_message(message_type, handler)
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.handlers.off(subscription)
    }

    /// Start connecting and wait for the first attempt.
    ///
    /// A no-op while a connect cycle is already running. When the first
    /// attempt fails its error is returned and retries continue in the
    /// background.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.force_closed.load(Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }

        let first = {
            let mut driver = self.inner.driver.lock().await;
            if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
                tracing::debug!(endpoint = %self.inner.id, state = %self.state(), "Connect ignored, already active");
                return Ok(());
            }
            let (driver_slot, first) = Inner::spawn_driver(&self.inner);
            *driver = Some(driver_slot);
            first
        };

        first.await.unwrap_or(Err(FabricError::Closed))
    }

    /// Send a message, buffering it while disconnected.
    pub fn send(&self, message: impl IntoWire) -> Result<SendOutcome> {
        if self.inner.force_closed.load(Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }
        let text = message.into_wire()?;
        Ok(self.inner.enqueue(text))
    }

    /// Close for good: stop heartbeats and pending reconnects, send a close
    /// frame, drop the transport. Only `reconnect()` revives the endpoint.
    pub async fn close(&self, code: u16, reason: &str) {
        self.inner.force_closed.store(true, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Closing);

        let driver = self.inner.driver.lock().await.take();
        if let Some(sender) = self.inner.outbox.lock().sender.take() {
            let _ = sender.send(Frame::Close {
                code,
                reason: reason.to_string(),
            });
        }
        if let Some(driver) = driver {
            Inner::stop_driver(driver).await;
        }

        self.inner.set_state(ConnectionState::ForceClosed);
        tracing::info!(endpoint = %self.inner.id, code, reason, "Endpoint closed");
        self.inner.handlers.emit(&EndpointEvent::Close {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Drop the current transport and connect again right away, optionally
    /// to a new address. Resets the attempt counter and revives a
    /// force-closed endpoint.
    pub async fn reconnect(&self, address: Option<&str>) -> Result<()> {
        if let Some(address) = address {
            *self.inner.target.lock() = parse_target(address)?;
        }

        let first = {
            let mut driver = self.inner.driver.lock().await;
            if let Some(old) = driver.take() {
                Inner::stop_driver(old).await;
            }
            self.inner.force_closed.store(false, Ordering::SeqCst);
            tracing::info!(endpoint = %self.inner.id, url = %self.target(), "Manual reconnect");
            let (driver_slot, first) = Inner::spawn_driver(&self.inner);
            *driver = Some(driver_slot);
            first
        };

        first.await.unwrap_or(Err(FabricError::Closed))
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(endpoint = %self.id, from = %previous, to = %state, "State changed");
        }
    }

    fn enqueue(&self, text: String) -> SendOutcome {
        let mut outbox = self.outbox.lock();

        if let Some(sender) = outbox.sender.as_ref() {
            match sender.send(Frame::Text(text)) {
                Ok(()) => return SendOutcome::Sent,
                Err(mpsc::error::SendError(frame)) => {
                    outbox.sender = None;
                    let Frame::Text(text) = frame else {
                        return SendOutcome::Buffered {
                            dropped_oldest: false,
                        };
                    };
                    return self.buffer(&mut outbox, text);
                }
            }
        }

        self.buffer(&mut outbox, text)
    }

    fn buffer(&self, outbox: &mut Outbox, text: String) -> SendOutcome {
        let cap = self.config.max_buffered_messages;
        let mut dropped_oldest = false;
        if cap == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(endpoint = %self.id, "Buffering disabled, message dropped");
            return SendOutcome::Buffered {
                dropped_oldest: true,
            };
        }
        while outbox.buffer.len() >= cap {
            outbox.buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            dropped_oldest = true;
        }
        if dropped_oldest {
            tracing::warn!(endpoint = %self.id, cap, "Send buffer full, dropped oldest message");
        }
        outbox.buffer.push_back(text);
        SendOutcome::Buffered { dropped_oldest }
    }

    /// Install a fresh writer channel, moving the buffer onto it first.
    fn attach(&self) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut outbox = self.outbox.lock();
        let flushed = outbox.buffer.len();
        for text in outbox.buffer.drain(..) {
            let _ = tx.send(Frame::Text(text));
        }
        outbox.sender = Some(tx);
        if flushed > 0 {
            tracing::info!(endpoint = %self.id, flushed, "Flushed buffered messages");
        }
        rx
    }

    /// Detach the writer channel and put anything it never wrote back at the
    /// front of the buffer.
    fn detach(&self, mut rx: mpsc::UnboundedReceiver<Frame>) {
        let mut outbox = self.outbox.lock();
        outbox.sender = None;
        let mut unsent = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Text(text) = frame {
                unsent.push(text);
            }
        }
        for text in unsent.into_iter().rev() {
            outbox.buffer.push_front(text);
        }
        let cap = self.config.max_buffered_messages;
        let mut dropped = 0u64;
        while outbox.buffer.len() > cap {
            outbox.buffer.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
            tracing::warn!(endpoint = %self.id, cap, dropped, "Send buffer full after disconnect, dropped oldest messages");
        }
    }

    fn spawn_driver(inner: &Arc<Self>) -> (Driver, oneshot::Receiver<Result<()>>) {
        let cancel = CancellationToken::new();
        let (first_tx, first_rx) = oneshot::channel();
        inner.terminal_reported.store(false, Ordering::SeqCst);
        inner.attempts.store(0, Ordering::Relaxed);
        let handle = tokio::spawn(Arc::clone(inner).drive(cancel.clone(), first_tx));
        (Driver { cancel, handle }, first_rx)
    }

    /// Cancel the driver and wait for it, aborting after `CLOSE_GRACE`.
    async fn stop_driver(mut driver: Driver) {
        driver.cancel.cancel();
        if time::timeout(CLOSE_GRACE, &mut driver.handle).await.is_err() {
            driver.handle.abort();
            let _ = driver.handle.await;
        }
    }

    async fn drive(self: Arc<Self>, cancel: CancellationToken, first: oneshot::Sender<Result<()>>) {
        let mut first = Some(first);
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.reconnect_base_ms),
            self.config.max_reconnect_attempts,
        );

        loop {
            if cancel.is_cancelled() {
                return;
            }

            self.set_state(ConnectionState::Connecting);
            let target = self.target.lock().clone();
            let connect = with_timeout(self.config.connect_timeout(), async {
                let (stream, _) = tokio_tungstenite::connect_async(target.as_str()).await?;
                Ok(stream)
            });
            let attempt = tokio::select! {
                result = connect => result,
                () = cancel.cancelled() => return,
            };

            match attempt {
                Ok(stream) => {
                    let attempts = backoff.attempts();
                    backoff.reset();
                    self.attempts.store(0, Ordering::Relaxed);

                    let rx = self.attach();
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(endpoint = %self.id, url = %target, "Connected");
                    if let Some(first) = first.take() {
                        let _ = first.send(Ok(()));
                    }
                    self.handlers.emit(&EndpointEvent::Open);
                    if attempts > 0 {
                        self.handlers.emit(&EndpointEvent::Reconnect { attempts });
                    }

                    let (end, rx) = self.run_session(stream, rx, &cancel).await;
                    self.detach(rx);

                    match end {
                        SessionEnd::Cancelled | SessionEnd::LocalClose => return,
                        SessionEnd::RemoteClose { code, reason } => {
                            tracing::info!(endpoint = %self.id, code = ?code, reason = %reason, "Connection closed by peer");
                            self.set_state(ConnectionState::Closing);
                            self.handlers.emit(&EndpointEvent::Close { code, reason });
                        }
                        SessionEnd::Failed(error) => {
                            tracing::warn!(endpoint = %self.id, error = %error, "Connection lost");
                            self.set_state(ConnectionState::Error);
                            self.emit_error(&error, false);
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(endpoint = %self.id, url = %target, error = %error, "Connect attempt failed");
                    self.set_state(ConnectionState::Error);
                    self.emit_error(&error, false);
                    if let Some(first) = first.take() {
                        let _ = first.send(Err(error));
                    }
                }
            }

            if self.force_closed.load(Ordering::SeqCst) || cancel.is_cancelled() {
                return;
            }

            match backoff.next_delay() {
                Some((attempt, delay)) => {
                    self.attempts.store(attempt, Ordering::Relaxed);
                    self.set_state(ConnectionState::Reconnecting);
                    metrics::record_reconnect();
                    tracing::info!(
                        endpoint = %self.id,
                        attempt,
                        max_attempts = backoff.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect"
                    );
                    self.handlers
                        .emit(&EndpointEvent::Reconnecting { attempt, delay });
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        () = cancel.cancelled() => return,
                    }
                }
                None => {
                    self.set_state(ConnectionState::Error);
                    let error = FabricError::Network(format!(
                        "gave up after {} reconnect attempts",
                        backoff.max_attempts()
                    ));
                    tracing::error!(endpoint = %self.id, error = %error, "Reconnect attempts exhausted");
                    self.emit_error(&error, true);
                    return;
                }
            }
        }
    }

    async fn run_session(
        &self,
        stream: Transport,
        mut rx: mpsc::UnboundedReceiver<Frame>,
        cancel: &CancellationToken,
    ) -> (SessionEnd, mpsc::UnboundedReceiver<Frame>) {
        let (mut sink, mut source) = stream.split();
        let interval = self.config.ping_interval();
        let pong_deadline = interval * PONG_TIMEOUT_INTERVALS;
        let mut heartbeat = time::interval_at(Instant::now() + interval, interval);
        let mut awaiting_pong_since: Option<Instant> = None;

        let end = loop {
            tokio::select! {
                biased;
                frame = rx.recv() => match frame {
                    Some(Frame::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            break SessionEnd::Failed(e.into());
                        }
                    }
                    Some(Frame::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break SessionEnd::LocalClose;
                    }
                    None => break SessionEnd::LocalClose,
                },
                () = cancel.cancelled() => break SessionEnd::Cancelled,
                _ = heartbeat.tick() => {
                    if let Some(since) = awaiting_pong_since {
                        if since.elapsed() >= pong_deadline {
                            tracing::warn!(endpoint = %self.id, waited_ms = since.elapsed().as_millis() as u64, "Heartbeat timed out");
                            break SessionEnd::Failed(FabricError::Timeout(pong_deadline));
                        }
                    }
                    let ping = Heartbeat::new(self.id.clone());
                    let text = match Envelope::Ping(ping.clone()).to_json() {
                        Ok(text) => text,
                        Err(e) => break SessionEnd::Failed(e),
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break SessionEnd::Failed(e.into());
                    }
                    *self.last_ping.lock() = Some(Utc::now());
                    awaiting_pong_since.get_or_insert_with(Instant::now);
                    self.handlers.emit(&EndpointEvent::Ping(ping));
                }
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => match Envelope::parse(text.as_str()) {
                        Ok(Envelope::Ping(ping)) => {
                            let pong = Envelope::pong_for(&ping, self.id.clone());
                            let reply = match pong.to_json() {
                                Ok(reply) => reply,
                                Err(e) => break SessionEnd::Failed(e),
                            };
                            if let Err(e) = sink.send(Message::Text(reply.into())).await {
                                break SessionEnd::Failed(e.into());
                            }
                            tracing::trace!(endpoint = %self.id, sender = %ping.sender, "Answered ping");
                        }
                        Ok(Envelope::Pong(pong)) => {
                            awaiting_pong_since = None;
                            *self.last_pong.lock() = Some(Utc::now());
                            self.handlers.emit(&EndpointEvent::Pong(pong));
                        }
                        Ok(envelope) => {
                            metrics::record_message("in", envelope.message_type());
                            self.handlers.emit(&EndpointEvent::Message(envelope));
                        }
                        Err(e) => {
                            tracing::warn!(endpoint = %self.id, error = %e, "Dropping malformed message");
                        }
                    },
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong_since = None;
                        *self.last_pong.lock() = Some(Utc::now());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                            None => (None, String::new()),
                        };
                        break SessionEnd::RemoteClose { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Failed(e.into()),
                    None => break SessionEnd::RemoteClose { code: None, reason: String::new() },
                },
            }
        };

        if matches!(end, SessionEnd::Cancelled) {
            let _ = sink.close().await;
        }
        (end, rx)
    }

    fn emit_error(&self, error: &FabricError, terminal: bool) {
        if terminal && self.terminal_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handlers.emit(&EndpointEvent::Error {
            message: error.to_string(),
            kind: error.kind(),
            terminal,
        });
    }
}

fn parse_target(address: &str) -> Result<Url> {
    let url = Url::parse(address)
        .map_err(|e| FabricError::Parse(format!("invalid endpoint address `{address}`: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(FabricError::Parse(format!(
            "unsupported scheme `{other}` in `{address}`, expected ws or wss"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cap: usize) -> EndpointConfig {
        EndpointConfig {
            max_buffered_messages: cap,
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn rejects_non_websocket_targets() {
        assert!(ConnectionEndpoint::new("http://localhost:1", config(5)).is_err());
        assert!(ConnectionEndpoint::new("not a url", config(5)).is_err());
        assert!(ConnectionEndpoint::new("ws://localhost:8768/ws", config(5)).is_ok());
    }

    #[test]
    fn buffers_while_disconnected_and_drops_oldest() {
        let endpoint = ConnectionEndpoint::new("ws://127.0.0.1:1", config(2)).unwrap();
        assert_eq!(
            endpoint.send("a").unwrap(),
            SendOutcome::Buffered {
                dropped_oldest: false
            }
        );
        endpoint.send("b").unwrap();
        assert_eq!(
            endpoint.send("c").unwrap(),
            SendOutcome::Buffered {
                dropped_oldest: true
            }
        );

        let stats = endpoint.stats();
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.dropped, 1);
        let buffer: Vec<String> = endpoint.inner.outbox.lock().buffer.iter().cloned().collect();
        assert_eq!(buffer, vec!["b", "c"]);
    }

    #[test]
    fn attach_flushes_in_order_before_new_sends() {
        let endpoint = ConnectionEndpoint::new("ws://127.0.0.1:1", config(10)).unwrap();
        endpoint.send("1").unwrap();
        endpoint.send("2").unwrap();

        let mut rx = endpoint.inner.attach();
        assert_eq!(endpoint.send("3").unwrap(), SendOutcome::Sent);

        let mut seen = Vec::new();
        while let Ok(Frame::Text(text)) = rx.try_recv() {
            seen.push(text);
        }
        assert_eq!(seen, vec!["1", "2", "3"]);
    }

    #[test]
    fn detach_returns_unsent_to_front() {
        let endpoint = ConnectionEndpoint::new("ws://127.0.0.1:1", config(10)).unwrap();
        let rx = endpoint.inner.attach();
        endpoint.send("queued-1").unwrap();
        endpoint.send("queued-2").unwrap();
        endpoint.inner.detach(rx);
        endpoint.send("later").unwrap();

        let buffer: Vec<String> = endpoint.inner.outbox.lock().buffer.iter().cloned().collect();
        assert_eq!(buffer, vec!["queued-1", "queued-2", "later"]);
    }

    #[test]
    fn detach_over_cap_drops_oldest() {
        let endpoint = ConnectionEndpoint::new("ws://127.0.0.1:1", config(2)).unwrap();
        let rx = endpoint.inner.attach();
        endpoint.send("queued-1").unwrap();
        endpoint.send("queued-2").unwrap();
        endpoint.send("queued-3").unwrap();
        endpoint.inner.detach(rx);

        let buffer: Vec<String> = endpoint.inner.outbox.lock().buffer.iter().cloned().collect();
        assert_eq!(buffer, vec!["queued-2", "queued-3"]);
        assert_eq!(endpoint.stats().dropped, 1);
    }

    #[tokio::test]
    async fn wait_for_state_times_out_and_sees_current() {
        let endpoint = ConnectionEndpoint::new("ws://127.0.0.1:1", config(2)).unwrap();
        assert!(
            endpoint
                .wait_for_state(ConnectionState::Disconnected, Duration::from_millis(10))
                .await
        );
        assert!(
            !endpoint
                .wait_for_state(ConnectionState::Connected, Duration::from_millis(20))
                .await
        );
    }

    #[tokio::test]
    async fn closed_endpoint_rejects_send_and_connect() {
        let endpoint = ConnectionEndpoint::new("ws://127.0.0.1:1", config(5)).unwrap();
        endpoint.close(1000, "done").await;
        assert_eq!(endpoint.state(), ConnectionState::ForceClosed);
        assert!(matches!(endpoint.send("x"), Err(FabricError::Closed)));
        assert!(matches!(endpoint.connect().await, Err(FabricError::Closed)));
    }

    #[tokio::test]
    async fn close_emits_close_event() {
        let endpoint = ConnectionEndpoint::new("ws://127.0.0.1:1", config(5)).unwrap();
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            endpoint.on(EventKind::Close, move |event| {
                if let EndpointEvent::Close { code, .. } = event {
                    *seen.lock() = *code;
                }
            });
        }
        endpoint.close(4001, "bye").await;
        assert_eq!(*seen.lock(), Some(4001));
    }
}
