//! A stand-in gateway for the supervisor tests.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Kill,
}

/// Accepts WebSocket clients, records the text frames they send, and lets
/// the test push frames to them or drop them.
pub struct StubGateway {
    pub addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    frames: mpsc::UnboundedReceiver<String>,
    control: broadcast::Sender<Control>,
    listener: JoinHandle<()>,
}

impl StubGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(16);

        let counter = accepts.clone();
        let control_tx = control.clone();
        let listener = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut control_rx = control_tx.subscribe();
                let frame_tx = frame_tx.clone();

                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(socket).await else {
                        return;
                    };
                    loop {
                        tokio::select! {
                            frame = ws.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = frame_tx.send(text.as_str().to_string());
                                }
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                                Some(Ok(_)) => {}
                            },
                            control = control_rx.recv() => match control {
                                Ok(Control::Push(text)) => {
                                    let _ = ws.send(Message::Text(text.into())).await;
                                }
                                Ok(Control::Kill) | Err(_) => return,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            accepts,
            frames,
            control,
            listener,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Sends `text` to every connected client.
    pub fn push(&self, text: &str) {
        let _ = self.control.send(Control::Push(text.to_string()));
    }

    /// Drops every connected client without a close handshake.
    pub fn kill_clients(&self) {
        let _ = self.control.send(Control::Kill);
    }

    /// Kills every client and stops listening.
    pub fn stop(&self) {
        self.kill_clients();
        self.listener.abort();
    }

    pub async fn next_frame(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame from client")
            .expect("gateway stopped");
        serde_json::from_str(&text).expect("client frame JSON")
    }
}

/// An address nothing is listening on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    format!("ws://{}", listener.local_addr().unwrap())
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
