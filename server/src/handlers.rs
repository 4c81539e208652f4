//! # WebSocket Handlers
//!
//! Contains the per-session driver of the gateway:
//! - Upgrading HTTP connections to WebSocket
//! - Opening the session's upstream connection
//! - Pumping client frames into the dispatcher and envelopes back out
//! - Tearing both sides down when either one goes away

use crate::backend::{self, UpstreamExit};
use crate::dispatcher;
use crate::session::{SessionEntry, SessionLifecycle, SessionState};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bridge_protocol::Envelope;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long teardown waits for the upstream task to send `EXIT` and close.
const UPSTREAM_GRACE: Duration = Duration::from_secs(1);

/// How long queued envelopes may take to flush when the gateway, not the
/// client, ends the session.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Which side ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    ClientClosed,
    ClientError,
    UpstreamClosed,
    Shutdown,
}

// ─── WebSocket Upgrade Endpoint ─────────────────────────────────

/// `GET /` and `GET /ws`: upgrade into a bridged session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

// ─── Session Driver ─────────────────────────────────────────────

/// Runs one session from accept to teardown.
///
/// ## Flow:
/// 1. Assign a connection ID and start dialing the backend
/// 2. Register the session for the shutdown sweep
/// 3. Spawn the outbound task that serializes envelopes onto the socket
/// 4. Dispatch client frames until the client, the upstream, or a
///    gateway shutdown ends the session
/// 5. Close the upstream (best-effort `EXIT`), deregister, close the client
async fn handle_connection(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().to_string();
    let _live = state.track();
    info!(%conn_id, "Client connected");

    let mut shutdown_rx = state.shutdown.subscribe();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let lifecycle = SessionLifecycle::new();
    let (backend, mut upstream) = backend::open(
        conn_id.clone(),
        state.config.upstream_addr(),
        tx.clone(),
        lifecycle.clone(),
    );
    state.sessions.insert(
        conn_id.clone(),
        SessionEntry {
            backend: backend.clone(),
            lifecycle: lifecycle.clone(),
        },
    );

    // ── Outbound Task ──
    // Drains the envelope queue in order. Once every sender is gone the
    // queue is flushed and the socket is closed from our side.
    let mut outbound_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(t) => t,
                Err(e) => {
                    error!("Serialize error: {}", e);
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // ── Inbound Loop ──
    let mut upstream_done = false;
    let reason = if state.shutdown.is_triggered() {
        Teardown::Shutdown
    } else {
        loop {
            tokio::select! {
                frame = ws_stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatcher::dispatch(&conn_id, text.as_str(), &backend, &tx);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        dispatcher::dispatch(&conn_id, &String::from_utf8_lossy(&bytes), &backend, &tx);
                    }
                    Some(Ok(Message::Close(_))) | None => break Teardown::ClientClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%conn_id, "Client socket error: {}", e);
                        break Teardown::ClientError;
                    }
                },
                exit = &mut upstream, if !upstream_done => {
                    upstream_done = true;
                    match exit {
                        // The session outlives a failed dial; commands are
                        // answered with "not connected" from here on.
                        Ok(UpstreamExit::DialFailed) => {}
                        Ok(other) => {
                            debug!(%conn_id, "Upstream finished: {:?}", other);
                            break Teardown::UpstreamClosed;
                        }
                        Err(e) => {
                            error!(%conn_id, "Upstream task failed: {}", e);
                            break Teardown::UpstreamClosed;
                        }
                    }
                },
                _ = shutdown_rx.recv() => break Teardown::Shutdown,
            }
        }
    };

    // ── Teardown ──
    lifecycle.advance(SessionState::Closing);
    info!(%conn_id, ?reason, "Disconnecting");

    backend.close();
    if !upstream_done && tokio::time::timeout(UPSTREAM_GRACE, &mut upstream).await.is_err() {
        warn!(%conn_id, "Upstream did not close in time; aborting");
        upstream.abort();
    }

    state.sessions.remove(&conn_id);
    drop(backend);
    drop(tx);

    match reason {
        // Nobody is left to read late replies.
        Teardown::ClientClosed | Teardown::ClientError => outbound_task.abort(),
        Teardown::UpstreamClosed | Teardown::Shutdown => {
            if tokio::time::timeout(FLUSH_GRACE, &mut outbound_task).await.is_err() {
                outbound_task.abort();
            }
        }
    }

    lifecycle.advance(SessionState::Closed);
    info!(%conn_id, "Session closed");
}
