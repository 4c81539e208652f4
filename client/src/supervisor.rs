//! # Gateway Connection Supervisor
//!
//! Gives callers one logical connection to the gateway on top of a WebSocket
//! transport that may drop at any time:
//! - [`Supervisor::connect`] is idempotent and coalesces concurrent callers
//!   onto a single in-flight dial
//! - [`Supervisor::send_command`] connects first when needed and reports
//!   failures through the `error` subscription instead of returning them
//! - callbacks are registered per [`EventKind`], one slot each, and survive
//!   reconnects
//!
//! The supervisor never reconnects by itself. See
//! [`Reconnector`](crate::reconnect::Reconnector) for the retry policy.

use crate::error::ClientError;
use crate::state::{Callback, EventKind, Link, Subscribers};
use bridge_protocol::{ClientFrame, Envelope};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The dial every concurrent `connect()` caller awaits.
type PendingDial = Shared<BoxFuture<'static, Result<(), ClientError>>>;

/// Message reported to `close` subscribers when the transport drops.
pub const LINK_LOST: &str = "Gateway connection closed";

struct Inner {
    url: String,
    connected: AtomicBool,
    link: Mutex<Option<Link>>,
    pending: Mutex<Option<PendingDial>>,
    subscribers: Subscribers,
    dials: AtomicUsize,
    generation: AtomicU64,
}

/// Cheaply cloneable handle; all clones share one connection.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                connected: AtomicBool::new(false),
                link: Mutex::new(None),
                pending: Mutex::new(None),
                subscribers: Subscribers::default(),
                dials: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Opens the transport unless it is already open.
    ///
    /// While a dial is in flight every caller awaits that same dial and
    /// receives its outcome, so at most one transport is ever being opened.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }

        let attempt = {
            let mut pending = lock(&self.inner.pending);
            if self.is_connected() {
                return Ok(());
            }
            match pending.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = dial(self.inner.clone()).boxed().shared();
                    *pending = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// True only while the supervisor considers itself connected AND the
    /// current transport is still open.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
            && lock(&self.inner.link)
                .as_ref()
                .is_some_and(Link::is_open)
    }

    /// Sends `{"type":"command","command":...}` to the gateway, connecting
    /// first if needed.
    ///
    /// Returns whether the frame was handed to the transport. On failure the
    /// command is dropped and an `error` event is emitted.
    pub async fn send_command(&self, command: &str) -> bool {
        if let Err(err) = self.connect().await {
            warn!(%err, command, "Dropping command, gateway unreachable");
            self.inner.subscribers.emit(EventKind::Error, &err.to_envelope());
            return false;
        }

        let frame = ClientFrame::Command {
            command: command.to_string(),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode command frame: {}", e);
                return false;
            }
        };

        let sent = lock(&self.inner.link)
            .as_ref()
            .is_some_and(|link| link.tx.send(Message::Text(text.into())).is_ok());
        if !sent {
            self.inner
                .subscribers
                .emit(EventKind::Error, &ClientError::NotConnected.to_envelope());
        }
        sent
    }

    /// Registers `callback` for `kind`, replacing any previous one.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.set_callback(kind, Arc::new(callback));
    }

    pub fn set_callback(&self, kind: EventKind, callback: Callback) {
        self.inner.subscribers.set(kind, callback);
    }

    /// Closes the transport. An explicit disconnect does not fire `close`.
    pub fn disconnect(&self) {
        let link = lock(&self.inner.link).take();
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(link) = link {
            info!(generation = link.generation, "Disconnecting from gateway");
            let _ = link.tx.send(Message::Close(None));
        }
    }

    /// Number of transports this supervisor has tried to open.
    pub fn dial_count(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }
}

impl Inner {
    /// Routes one text frame to the typed slot, then to `message`.
    fn deliver(&self, raw: &str) {
        match serde_json::from_str::<Envelope>(raw) {
            Ok(envelope) => {
                debug!(kind = envelope.kind(), "Envelope received");
                self.subscribers.emit(EventKind::of(&envelope), &envelope);
                self.subscribers.emit(EventKind::Message, &envelope);
            }
            Err(_) => {
                self.subscribers
                    .emit(EventKind::Message, &Envelope::text(raw.trim()));
            }
        }
    }

    /// Called by the reader of `generation` once its transport is gone.
    /// Transports that were already replaced or disconnected are ignored.
    fn link_lost(&self, generation: u64, failure: Option<ClientError>) {
        {
            let mut link = lock(&self.link);
            match link.as_ref() {
                Some(current) if current.generation == generation => *link = None,
                _ => return,
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        warn!(generation, "Lost connection to gateway");

        if let Some(err) = failure {
            self.subscribers.emit(EventKind::Error, &err.to_envelope());
        }
        self.subscribers
            .emit(EventKind::Close, &Envelope::disconnected(LINK_LOST));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Dialing ────────────────────────────────────────────────────

async fn dial(inner: Arc<Inner>) -> Result<(), ClientError> {
    let outcome = open_link(&inner).await;
    lock(&inner.pending).take();
    outcome
}

async fn open_link(inner: &Arc<Inner>) -> Result<(), ClientError> {
    let url = Url::parse(&inner.url).map_err(|e| ClientError::InvalidUrl {
        url: inner.url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ClientError::InvalidUrl {
            url: inner.url.clone(),
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }

    inner.dials.fetch_add(1, Ordering::SeqCst);
    info!("Connecting to gateway: {}", url);

    let (ws, _) = connect_async(url.as_str()).await.map_err(|e| {
        warn!("Gateway connection failed: {}", e);
        ClientError::Transport(e.to_string())
    })?;

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (sink, stream) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let open = Arc::new(AtomicBool::new(true));

    // Install before the reader starts so a lost link always finds itself.
    *lock(&inner.link) = Some(Link {
        tx,
        open: open.clone(),
        generation,
    });
    inner.connected.store(true, Ordering::SeqCst);
    info!(generation, "Connected to gateway");

    tokio::spawn(write_loop(sink, rx, open.clone()));
    tokio::spawn(read_loop(Arc::downgrade(inner), stream, open, generation));
    Ok(())
}

// ─── Transport Tasks ────────────────────────────────────────────

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    open: Arc<AtomicBool>,
) {
    while let Some(frame) = rx.recv().await {
        let closing = matches!(frame, Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            debug!("Gateway write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    open.store(false, Ordering::SeqCst);
    let _ = sink.close().await;
}

async fn read_loop(
    inner: Weak<Inner>,
    mut stream: SplitStream<WsStream>,
    open: Arc<AtomicBool>,
    generation: u64,
) {
    let failure = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match inner.upgrade() {
                Some(inner) => inner.deliver(text.as_str()),
                None => return,
            },
            Some(Ok(Message::Close(_))) | None => break None,
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(ClientError::Transport(e.to_string())),
        }
    };

    open.store(false, Ordering::SeqCst);
    if let Some(inner) = inner.upgrade() {
        inner.link_lost(generation, failure);
    }
}
