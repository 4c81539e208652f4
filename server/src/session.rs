//! # Session Lifecycle
//!
//! Every accepted client connection is a session that moves through
//! `Opening → Active → Closing → Closed`:
//!
//! - **Opening**: client connected, upstream dial in flight (or failed)
//! - **Active**: upstream connected
//! - **Closing**: either endpoint initiated shutdown
//! - **Closed**: all resources released
//!
//! Transitions only move forward and none can be re-entered.

use crate::backend::BackendHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opening,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Opening, Active) | (Opening, Closing) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// Shared handle on one session's state, held in a watch channel.
#[derive(Clone)]
pub struct SessionLifecycle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Opening);
        Self { tx: Arc::new(tx) }
    }

    /// Moves to `next` if that is a legal forward transition.
    /// Returns `false` (and changes nothing) otherwise.
    pub fn advance(&self, next: SessionState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }
}

/// Registry entry for a live session.
///
/// Holds what the global shutdown sweep needs: the upstream handle to
/// force-close and the lifecycle to report on.
#[derive(Clone)]
pub struct SessionEntry {
    pub backend: BackendHandle,
    pub lifecycle: SessionLifecycle,
}
