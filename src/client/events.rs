//! Endpoint event subscriptions.
//!
//! Handlers are registered per [`EventKind`] (or per domain message type)
//! and invoked in registration order. Emission iterates a snapshot of the
//! table, so a handler may subscribe or unsubscribe without deadlocking, and
//! a panicking handler is logged and skipped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::protocol::{Envelope, Heartbeat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    Reconnecting,
    Reconnect,
    Ping,
    Pong,
}

#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Open,
    /// Any envelope other than heartbeats.
    Message(Envelope),
    Close {
        code: Option<u16>,
        reason: String,
    },
    Error {
        message: String,
        /// `FabricError::kind()` of the cause.
        kind: &'static str,
        /// Set once, when reconnect attempts are exhausted.
        terminal: bool,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// A connection opened after at least one reconnect attempt.
    Reconnect {
        attempts: u32,
    },
    Ping(Heartbeat),
    Pong(Heartbeat),
}

impl EndpointEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EndpointEvent::Open => EventKind::Open,
            EndpointEvent::Message(_) => EventKind::Message,
            EndpointEvent::Close { .. } => EventKind::Close,
            EndpointEvent::Error { .. } => EventKind::Error,
            EndpointEvent::Reconnecting { .. } => EventKind::Reconnecting,
            EndpointEvent::Reconnect { .. } => EventKind::Reconnect,
            EndpointEvent::Ping(_) => EventKind::Ping,
            EndpointEvent::Pong(_) => EventKind::Pong,
        }
    }
}

type Handler = Arc<dyn Fn(&EndpointEvent) + Send + Sync>;

#[derive(Clone)]
enum Target {
    Kind(EventKind),
    MessageType(String),
}

impl Target {
    fn matches(&self, event: &EndpointEvent) -> bool {
        match (self, event) {
            (Target::Kind(kind), event) => *kind == event.kind(),
            (Target::MessageType(wanted), EndpointEvent::Message(envelope)) => {
                envelope.message_type() == wanted
            }
            (Target::MessageType(_), _) => false,
        }
    }
}

#[derive(Clone)]
struct Entry {
    id: u64,
    target: Target,
    handler: Handler,
}

/// Ordered subscriber table.
#[derive(Default)]
pub struct HandlerTable {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl HandlerTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(self: &Arc<Self>, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&EndpointEvent) + Send + Sync + 'static,
    {
        self.insert(Target::Kind(kind), Arc::new(handler))
    }

    pub fn on_message<F>(self: &Arc<Self>, message_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let wrapped = move |event: &EndpointEvent| {
            if let EndpointEvent::Message(envelope) = event {
                handler(envelope);
            }
        };
        self.insert(Target::MessageType(message_type.to_string()), Arc::new(wrapped))
    }

    /// Remove a subscription. Returns false if it was already removed.
    pub fn off(&self, subscription: &Subscription) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != subscription.id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Invoke every matching handler with `event`.
    pub fn emit(&self, event: &EndpointEvent) {
        let snapshot: Vec<Entry> = self
            .entries
            .lock()
            .iter()
            .filter(|e| e.target.matches(event))
            .cloned()
            .collect();

        for entry in snapshot {
            let handler = Arc::clone(&entry.handler);
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    event = ?event.kind(),
                    subscription = entry.id,
                    "Event handler panicked"
                );
            }
        }
    }

    fn insert(self: &Arc<Self>, target: Target, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry {
            id,
            target,
            handler,
        });
        Subscription {
            id,
            table: Arc::downgrade(self),
        }
    }
}

/// Handle returned by `on`; pass to `off` or call [`Subscription::cancel`].
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    table: Weak<HandlerTable>,
}

impl Subscription {
    pub fn cancel(&self) -> bool {
        self.table
            .upgrade()
            .map(|table| table.off(self))
            .unwrap_or(false)
    }
}
