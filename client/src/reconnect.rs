//! # Reconnect Policy
//!
//! Fixed-delay retry on top of a [`Supervisor`]. Each `close` or `error`
//! incident schedules reconnect attempts `delay` apart; after `max_attempts`
//! consecutive failures the link is marked [`LinkHealth::Degraded`] and no
//! further attempts are made.

use crate::error::ClientError;
use crate::state::{Callback, EventKind};
use crate::supervisor::Supervisor;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default pause before each reconnect attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default number of consecutive attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Observable state of the supervised link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Connected, or recovered after an incident.
    Online,
    /// Not connected and no incident seen yet.
    Offline,
    /// Waiting for or running reconnect attempt `attempt` (1-based).
    Retrying { attempt: u32 },
    /// Attempts exhausted; the reconnector has stopped.
    Degraded,
}

/// Background retry loop bound to one supervisor. Dropping it stops retrying.
pub struct Reconnector {
    health: watch::Receiver<LinkHealth>,
    trigger: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl Reconnector {
    /// Takes over the supervisor's `close` and `error` slots.
    ///
    /// Errors are passed to `on_error` before they are acted on, including
    /// the final [`ClientError::Exhausted`] notice.
    pub fn install(
        supervisor: &Supervisor,
        policy: ReconnectPolicy,
        on_error: Option<Callback>,
    ) -> Self {
        let (trigger_tx, triggers) = mpsc::unbounded_channel::<()>();

        let trigger = trigger_tx.clone();
        let on_close = trigger_tx.clone();
        supervisor.on(EventKind::Close, move |_| {
            let _ = on_close.send(());
        });

        let forward = on_error.clone();
        supervisor.on(EventKind::Error, move |envelope| {
            if let Some(callback) = &forward {
                callback(envelope);
            }
            let _ = trigger_tx.send(());
        });

        let initial = if supervisor.is_connected() {
            LinkHealth::Online
        } else {
            LinkHealth::Offline
        };
        let (health_tx, health) = watch::channel(initial);

        let task = tokio::spawn(run(
            supervisor.clone(),
            policy,
            triggers,
            health_tx,
            on_error,
        ));

        Self {
            health,
            trigger,
            task,
        }
    }

    pub fn health(&self) -> watch::Receiver<LinkHealth> {
        self.health.clone()
    }

    /// Reports an incident the supervisor did not emit itself, such as a
    /// failed first `connect()`.
    pub fn trigger(&self) {
        let _ = self.trigger.send(());
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    supervisor: Supervisor,
    policy: ReconnectPolicy,
    mut triggers: mpsc::UnboundedReceiver<()>,
    health: watch::Sender<LinkHealth>,
    on_error: Option<Callback>,
) {
    while triggers.recv().await.is_some() {
        // Close and error for the same incident arrive back to back.
        while triggers.try_recv().is_ok() {}
        if supervisor.is_connected() {
            continue;
        }

        if !recover(&supervisor, &policy, &health).await {
            let exhausted = ClientError::Exhausted(policy.max_attempts);
            error!(url = supervisor.url(), "{}", exhausted);
            if let Some(callback) = &on_error {
                callback(&exhausted.to_envelope());
            }
            return;
        }
    }
}

/// Retries until connected or out of attempts. Returns whether it recovered.
async fn recover(
    supervisor: &Supervisor,
    policy: &ReconnectPolicy,
    health: &watch::Sender<LinkHealth>,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        health.send_replace(LinkHealth::Retrying { attempt });
        info!(
            attempt,
            max_attempts = policy.max_attempts,
            "Reconnecting in {:?}...",
            policy.delay
        );
        tokio::time::sleep(policy.delay).await;

        match supervisor.connect().await {
            Ok(()) => {
                info!(attempt, "Reconnected to gateway");
                health.send_replace(LinkHealth::Online);
                return true;
            }
            Err(err) => warn!(attempt, %err, "Reconnect attempt failed"),
        }
    }
    health.send_replace(LinkHealth::Degraded);
    false
}
