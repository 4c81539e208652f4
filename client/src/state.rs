//! # Supervisor State
//!
//! Contains the state types shared between the [`Supervisor`] handle and its
//! background transport tasks:
//! - [`EventKind`]: the names callers can subscribe to
//! - [`Subscribers`]: one callback slot per event name
//! - [`Link`]: the currently open transport, replaced on every reconnect
//!
//! [`Supervisor`]: crate::supervisor::Supervisor

use bridge_protocol::Envelope;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Callback invoked with the envelope that triggered an event.
pub type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Event names callers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Every envelope received from the gateway.
    Message,
    /// `connection` envelopes (upstream opened/closed).
    Connection,
    /// `server` envelopes (backend replies).
    Server,
    /// `error` envelopes and transport failures.
    Error,
    /// The transport to the gateway was lost.
    Close,
}

impl EventKind {
    /// The event an envelope is dispatched to, besides [`EventKind::Message`].
    pub fn of(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::Connection { .. } => EventKind::Connection,
            Envelope::Server { .. } => EventKind::Server,
            Envelope::Error { .. } => EventKind::Error,
        }
    }
}

// ─── Subscribers ────────────────────────────────────────────────

/// Single-slot callback table: registering a callback for an event replaces
/// the previous one. Survives reconnects.
#[derive(Default)]
pub struct Subscribers {
    slots: DashMap<EventKind, Callback>,
}

impl Subscribers {
    pub fn set(&self, kind: EventKind, callback: Callback) {
        self.slots.insert(kind, callback);
    }

    /// Invokes the callback registered for `kind`, if any.
    pub fn emit(&self, kind: EventKind, envelope: &Envelope) {
        // Clone out of the map so a callback may re-register itself.
        let callback = self.slots.get(&kind).map(|slot| slot.value().clone());
        if let Some(callback) = callback {
            callback(envelope);
        }
    }
}

// ─── Link ───────────────────────────────────────────────────────

/// One open WebSocket transport.
pub struct Link {
    /// Outbound frames, drained by the writer task.
    pub tx: mpsc::UnboundedSender<Message>,

    /// Cleared by the transport tasks as soon as either direction fails.
    pub open: Arc<AtomicBool>,

    /// Distinguishes this transport from the ones it replaced.
    pub generation: u64,
}

impl Link {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(hits: &Arc<AtomicUsize>) -> Callback {
        let hits = hits.clone();
        Arc::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn registering_replaces_previous_callback() {
        let subscribers = Subscribers::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        subscribers.set(EventKind::Server, counter(&first));
        subscribers.set(EventKind::Server, counter(&second));
        subscribers.emit(EventKind::Server, &Envelope::text("x"));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_without_subscriber_is_a_no_op() {
        let subscribers = Subscribers::default();
        subscribers.emit(EventKind::Close, &Envelope::disconnected("gone"));
        let hits = Arc::new(AtomicUsize::new(0));
        subscribers.set(EventKind::Error, counter(&hits));
        subscribers.emit(EventKind::Close, &Envelope::disconnected("gone"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn envelopes_map_to_their_event() {
        assert_eq!(EventKind::of(&Envelope::connected("up")), EventKind::Connection);
        assert_eq!(EventKind::of(&Envelope::text("x")), EventKind::Server);
        assert_eq!(EventKind::of(&Envelope::error("bad")), EventKind::Error);
    }
}
