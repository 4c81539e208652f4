//! # Backend Connector
//!
//! Owns the single upstream TCP connection of a session. One task per
//! session dials the backend, writes queued commands, reads replies through
//! the session's [`FrameDecoder`] and reports lifecycle events to the client
//! as envelopes.
//!
//! ```text
//! Client ──WS──▶ dispatcher ──BackendHandle::send──▶ [upstream task] ──TCP──▶ Backend
//! Client ◀──WS── outbound task ◀──ClientTx── [upstream task] ◀──TCP── Backend
//! ```
//!
//! The connector never reconnects on its own; that is left to the client.

use crate::decoder::FrameDecoder;
use crate::error::BridgeError;
use crate::session::{SessionLifecycle, SessionState};
use crate::state::ClientTx;
use bridge_protocol::Envelope;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Terminal command sent best-effort before the upstream is closed.
pub const EXIT_COMMAND: &str = "EXIT";

/// Upper bound on how long the farewell `EXIT` write may take.
const EXIT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

const READ_BUFFER_BYTES: usize = 8192;

/// How long an unterminated marker reply may wait for more bytes before it
/// is sent as it stands.
pub const MARKER_IDLE_FLUSH: Duration = Duration::from_millis(50);

enum Upstream {
    Line(String),
    Close,
}

/// Why the upstream task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamExit {
    /// The dial never succeeded. The session stays open without an upstream.
    DialFailed,
    /// The backend closed the connection.
    Closed,
    /// A read or write on the established connection failed.
    Errored,
    /// The session asked the connector to close.
    Cancelled,
}

// ─── Handle ─────────────────────────────────────────────────────

/// Cloneable handle on a session's upstream connection.
#[derive(Clone)]
pub struct BackendHandle {
    cmd_tx: mpsc::UnboundedSender<Upstream>,
    client_tx: ClientTx,
    writable: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl BackendHandle {
    /// True while the upstream is connected and not shutting down.
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    /// Queues `command` plus a newline for the backend.
    ///
    /// When the upstream is not writable the client gets
    /// `error{message: "not connected to server"}` instead.
    pub fn send(&self, command: &str) -> bool {
        let queued = self.is_writable()
            && self
                .cmd_tx
                .send(Upstream::Line(format!("{}\n", command)))
                .is_ok();
        if !queued {
            let _ = self.client_tx.send(BridgeError::NotConnected.to_envelope());
        }
        queued
    }

    /// Asks the upstream task to send `EXIT` and close the socket. An
    /// in-flight dial is abandoned instead.
    ///
    /// Returns `true` only for the first call; later calls do nothing.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.writable.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Upstream::Close);
        true
    }
}

// ─── Connector ──────────────────────────────────────────────────

/// Starts dialing `addr` in the background.
///
/// Envelopes produced for the client (connection status, decoded replies,
/// errors) are pushed onto `client_tx` in arrival order.
pub fn open(
    conn_id: String,
    addr: String,
    client_tx: ClientTx,
    lifecycle: SessionLifecycle,
) -> (BackendHandle, JoinHandle<UpstreamExit>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = BackendHandle {
        cmd_tx,
        client_tx: client_tx.clone(),
        writable: Arc::new(AtomicBool::new(false)),
        closed: Arc::new(AtomicBool::new(false)),
    };
    let flags = (handle.writable.clone(), handle.closed.clone());
    let task = tokio::spawn(run_upstream(
        conn_id, addr, cmd_rx, client_tx, flags, lifecycle,
    ));
    (handle, task)
}

async fn run_upstream(
    conn_id: String,
    addr: String,
    mut cmd_rx: mpsc::UnboundedReceiver<Upstream>,
    client_tx: ClientTx,
    (writable, closed): (Arc<AtomicBool>, Arc<AtomicBool>),
    lifecycle: SessionLifecycle,
) -> UpstreamExit {
    // ── Dial ──
    // A close request while dialing drops the connect future, which
    // abandons the half-open socket.
    let stream = tokio::select! {
        biased;
        _ = wait_for_close(&mut cmd_rx) => {
            debug!(%conn_id, "Dial abandoned");
            return UpstreamExit::Cancelled;
        }
        dialed = TcpStream::connect(&addr) => match dialed {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%conn_id, upstream = %addr, "Backend dial failed: {}", e);
                let _ = client_tx.send(BridgeError::Dial(e).to_envelope());
                return UpstreamExit::DialFailed;
            }
        },
    };

    info!(%conn_id, upstream = %addr, "Connected to backend");
    if !closed.load(Ordering::SeqCst) {
        writable.store(true, Ordering::SeqCst);
    }
    lifecycle.advance(SessionState::Active);
    let _ = client_tx.send(Envelope::connected(format!(
        "Connected to server at {}",
        addr
    )));

    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    let mut flush_at: Option<Instant> = None;

    // ── Relay ──
    let exit = loop {
        let flush_deadline = flush_at.unwrap_or_else(Instant::now);
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Upstream::Line(line)) => {
                    debug!(%conn_id, "→ backend: {}", line.trim_end());
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        error!(%conn_id, "Backend write failed: {}", e);
                        let _ = client_tx.send(BridgeError::Upstream(e).to_envelope());
                        break UpstreamExit::Errored;
                    }
                }
                Some(Upstream::Close) | None => {
                    let farewell = format!("{}\n", EXIT_COMMAND);
                    let _ = tokio::time::timeout(
                        EXIT_WRITE_TIMEOUT,
                        writer.write_all(farewell.as_bytes()),
                    )
                    .await;
                    break UpstreamExit::Cancelled;
                }
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!(%conn_id, "Backend closed the connection");
                    if let Some(envelope) = decoder.flush() {
                        let _ = client_tx.send(envelope);
                    }
                    let _ = client_tx.send(Envelope::disconnected("Server connection closed"));
                    break UpstreamExit::Closed;
                }
                Ok(n) => {
                    for envelope in decoder.feed(&buf[..n]) {
                        let _ = client_tx.send(envelope);
                    }
                    flush_at = decoder
                        .is_holding()
                        .then(|| Instant::now() + MARKER_IDLE_FLUSH);
                }
                Err(e) => {
                    error!(%conn_id, "Backend read failed: {}", e);
                    let _ = client_tx.send(BridgeError::Upstream(e).to_envelope());
                    break UpstreamExit::Errored;
                }
            },
            _ = tokio::time::sleep_until(flush_deadline), if flush_at.is_some() => {
                flush_at = None;
                if let Some(envelope) = decoder.flush() {
                    let _ = client_tx.send(envelope);
                }
            }
        }
    };

    writable.store(false, Ordering::SeqCst);
    if !decoder.pending().is_empty() {
        debug!(%conn_id, bytes = decoder.pending().len(), "Discarding partial reply");
    }
    drop(reader);
    drop(writer);
    exit
}

async fn wait_for_close(cmd_rx: &mut mpsc::UnboundedReceiver<Upstream>) {
    loop {
        match cmd_rx.recv().await {
            Some(Upstream::Close) | None => return,
            // Nothing is writable before the dial completes.
            Some(Upstream::Line(_)) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn close_sends_exit_once() {
        let (listener, addr) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let lifecycle = SessionLifecycle::new();
        let (handle, task) = open("t".into(), addr, tx, lifecycle.clone());

        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(matches!(rx.recv().await, Some(Envelope::Connection { .. })));
        assert_eq!(lifecycle.current(), SessionState::Active);
        assert!(handle.is_writable());

        assert!(handle.close());
        assert!(!handle.close());
        assert_eq!(task.await.unwrap(), UpstreamExit::Cancelled);

        let mut received = String::new();
        peer.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "EXIT\n");
    }

    #[tokio::test]
    async fn commands_are_newline_terminated() {
        let (listener, addr) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, task) = open("t".into(), addr, tx, SessionLifecycle::new());
        let (mut peer, _) = listener.accept().await.unwrap();
        rx.recv().await.unwrap();

        assert!(handle.send("BID 4 250"));
        handle.close();
        task.await.unwrap();

        let mut received = String::new();
        peer.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "BID 4 250\nEXIT\n");
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let (_listener, addr) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, _task) = open("t".into(), addr, tx, SessionLifecycle::new());

        assert!(!handle.send("LIST"));
        assert_eq!(rx.recv().await, Some(Envelope::error("not connected to server")));
        handle.close();
    }

    #[tokio::test]
    async fn close_during_dial_abandons_it() {
        let (_listener, addr) = listener().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let lifecycle = SessionLifecycle::new();
        let (handle, task) = open("t".into(), addr, tx, lifecycle.clone());

        assert!(handle.close());
        assert_eq!(task.await.unwrap(), UpstreamExit::Cancelled);
        assert_eq!(lifecycle.current(), SessionState::Opening);
        assert!(!handle.close());
    }

    #[tokio::test]
    async fn dial_failure_reports_error() {
        let (listener, addr) = listener().await;
        drop(listener);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, task) = open("t".into(), addr, tx, SessionLifecycle::new());

        assert_eq!(task.await.unwrap(), UpstreamExit::DialFailed);
        match rx.recv().await {
            Some(Envelope::Error { message }) => {
                assert!(message.starts_with("Error connecting to server"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!handle.is_writable());
    }

    #[tokio::test]
    async fn unterminated_ack_is_sent_once_backend_goes_quiet() {
        let (listener, addr) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_handle, _task) = open("t".into(), addr, tx, SessionLifecycle::new());
        let (mut peer, _) = listener.accept().await.unwrap();
        rx.recv().await.unwrap();

        peer.write_all(b"Login successful! TOKEN:abc").await.unwrap();
        peer.flush().await.unwrap();
        tokio::time::sleep(MARKER_IDLE_FLUSH / 5).await;
        peer.write_all(b"123").await.unwrap();
        peer.flush().await.unwrap();

        match rx.recv().await {
            Some(Envelope::Server { token, .. }) => assert_eq!(token.as_deref(), Some("abc123")),
            other => panic!("unexpected {other:?}"),
        }

        peer.write_all(b"AUCTIONS_LIST\n").await.unwrap();
        assert_eq!(rx.recv().await, Some(Envelope::text("AUCTIONS_LIST")));
    }

    #[tokio::test]
    async fn backend_close_reports_disconnect() {
        let (listener, addr) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_handle, task) = open("t".into(), addr, tx, SessionLifecycle::new());
        let (mut peer, _) = listener.accept().await.unwrap();
        rx.recv().await.unwrap();

        peer.write_all(b"AUCTIONS_LIST\n").await.unwrap();
        drop(peer);

        assert_eq!(task.await.unwrap(), UpstreamExit::Closed);
        assert_eq!(rx.recv().await, Some(Envelope::text("AUCTIONS_LIST")));
        assert_eq!(
            rx.recv().await,
            Some(Envelope::disconnected("Server connection closed"))
        );
    }
}
