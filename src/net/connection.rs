//! Per-client connection state held by the broker.
//!
//! # Responsibilities
//! - Own the outbound queue to the client's write task
//! - Track liveness (alive flag, last ping / pong)
//! - Count messages in both directions
//! - Carry the cancellation token every per-client timer hangs off

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::IntoWire;

/// Frames queued for a client's write task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Protocol-level ping.
    Ping,
    Close { code: u16, reason: String },
}

/// Broker-side record of one accepted connection.
pub struct ClientRecord {
    pub id: String,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    is_alive: AtomicBool,
    last_ping: Mutex<Option<DateTime<Utc>>>,
    last_pong: Mutex<Option<DateTime<Utc>>>,
    sent: AtomicU64,
    received: AtomicU64,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl ClientRecord {
    pub fn new(
        id: String,
        remote_addr: SocketAddr,
        tx: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: Utc::now(),
            is_alive: AtomicBool::new(true),
            last_ping: Mutex::new(None),
            last_pong: Mutex::new(None),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            tx,
            cancel,
        }
    }

    /// Open until the transport closed or the connection was cancelled.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Queue a text frame. Returns false when the client is gone or its
    /// queue is full.
    pub fn send(&self, message: impl IntoWire) -> bool {
        if !self.is_open() {
            return false;
        }
        let text = match message.into_wire() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(client_id = %self.id, error = %e, "Failed to serialize outbound message");
                return false;
            }
        };
        match self.tx.try_send(Outbound::Text(text)) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client_id = %self.id, "Outbound queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a protocol ping and stamp `last_ping`.
    pub fn ping(&self) -> bool {
        *self.last_ping.lock() = Some(Utc::now());
        self.tx.try_send(Outbound::Ping).is_ok()
    }

    /// Ask the write task to send a close frame and finish.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .try_send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Drop the transport without a close handshake.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Some(Utc::now());
    }

    /// Read and clear the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            id: self.id.clone(),
            remote_addr: self.remote_addr,
            connected_at: self.connected_at,
            disconnected_at: None,
            alive: self.is_alive.load(Ordering::Relaxed),
            last_ping: *self.last_ping.lock(),
            last_pong: *self.last_pong.lock(),
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }
}

/// Serializable snapshot of a [`ClientRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSummary {
    pub id: String,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    pub alive: bool,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;

    fn make_record(capacity: usize) -> (ClientRecord, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let record = ClientRecord::new(
            "client-1".into(),
            "127.0.0.1:40000".parse().unwrap(),
            tx,
            CancellationToken::new(),
        );
        (record, rx)
    }

    #[tokio::test]
    async fn strings_pass_through_unchanged() {
        let (record, mut rx) = make_record(4);
        assert!(record.send("{\"type\":\"raw\" }"));
        assert_eq!(
            rx.recv().await.unwrap(),
            Outbound::Text("{\"type\":\"raw\" }".into())
        );
        assert_eq!(record.messages_sent(), 1);
    }

    #[tokio::test]
    async fn envelopes_are_serialized() {
        let (record, mut rx) = make_record(4);
        assert!(record.send(&Envelope::ping("broker")));
        match rx.recv().await.unwrap() {
            Outbound::Text(text) => assert!(text.contains("\"type\":\"ping\"")),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn full_queue_rejects() {
        let (record, _rx) = make_record(1);
        assert!(record.send("a"));
        assert!(!record.send("b"));
        assert_eq!(record.messages_sent(), 1);
    }

    #[test]
    fn closed_or_cancelled_is_not_open() {
        let (record, rx) = make_record(4);
        assert!(record.is_open());
        drop(rx);
        assert!(!record.is_open());
        assert!(!record.send("a"));

        let (record, _rx) = make_record(4);
        record.terminate();
        assert!(!record.is_open());
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (record, _rx) = make_record(4);
        assert!(record.check_alive());
        assert!(!record.check_alive());
        record.mark_alive();
        assert!(record.check_alive());
        assert!(record.summary().last_pong.is_some());
    }
}
