//! # Gateway State
//!
//! Holds the shared application state for the gateway:
//! - **Configuration**: where the backend lives
//! - **Session registry**: maps connection IDs to their live session entries
//! - **Shutdown coordinator**: fans a shutdown signal out to every session
//!
//! The registry is the only structure shared between sessions. It is
//! mutated on session creation and destruction and swept on shutdown.

use crate::config::GatewayConfig;
use crate::lifecycle::Shutdown;
use crate::session::SessionEntry;
use bridge_protocol::Envelope;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Unbounded sender feeding a client's outbound WebSocket queue.
/// Each connected client gets one of these.
pub type ClientTx = mpsc::UnboundedSender<Envelope>;

/// Shared application state, cloned and passed to each request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,

    /// Live sessions keyed by connection ID.
    pub sessions: Arc<DashMap<String, SessionEntry>>,

    pub shutdown: Arc<Shutdown>,

    /// Session drivers still running, including ones past deregistration.
    live: Arc<AtomicUsize>,
}

/// Counts one running session driver until dropped.
pub struct SessionGuard(Arc<AtomicUsize>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(DashMap::new()),
            shutdown: Arc::new(Shutdown::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Marks a session driver as running for as long as the guard lives.
    pub fn track(&self) -> SessionGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        SessionGuard(self.live.clone())
    }

    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Global shutdown sweep.
    ///
    /// Signals every session to close its client socket and force-closes
    /// every upstream connection still in the registry. Sessions tearing
    /// down concurrently are unaffected: `close` is idempotent and removal
    /// waits for the shard lock held by the iteration.
    pub fn shutdown_all(&self) {
        self.shutdown.trigger();
        let mut closed = 0usize;
        for entry in self.sessions.iter() {
            if entry.backend.close() {
                closed += 1;
            }
        }
        info!(
            sessions = self.sessions.len(),
            upstreams_closed = closed,
            "Shutdown sweep complete"
        );
    }
}
