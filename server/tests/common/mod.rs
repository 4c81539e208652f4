//! Shared utilities for the gateway integration tests.

use bridge_protocol::Envelope;
use bridge_server::{AppState, GatewayConfig};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─── Mock Backend ───────────────────────────────────────────────

/// A line-protocol backend that hands each accepted connection to the test.
pub struct MockBackend {
    pub addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<BackendConn>,
}

/// One accepted upstream connection. `None` on the line channel means EOF.
pub struct BackendConn {
    lines: mpsc::UnboundedReceiver<Option<String>>,
    writer: OwnedWriteHalf,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let (read, writer) = socket.into_split();
                let (line_tx, lines) = mpsc::unbounded_channel();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(read).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        let _ = line_tx.send(Some(line));
                    }
                    let _ = line_tx.send(None);
                });
                if conn_tx.send(BackendConn { lines, writer }).is_err() {
                    break;
                }
            }
        });

        Self { addr, conns }
    }

    pub async fn accept(&mut self) -> BackendConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("backend never dialed")
            .expect("backend listener stopped")
    }
}

impl BackendConn {
    pub async fn write(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Writes without asserting; the gateway may already have hung up.
    pub async fn write_late(&mut self, bytes: &[u8]) {
        let _ = self.writer.write_all(bytes).await;
        let _ = self.writer.flush().await;
    }

    /// Next line received from the gateway, `None` once it hung up.
    pub async fn next_line(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.lines.recv())
            .await
            .expect("no line from gateway")
            .flatten()
    }

    /// Closes the backend side of the connection.
    pub fn hang_up(self) {
        drop(self.writer);
    }
}

/// An address nothing is listening on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

// ─── Gateway ────────────────────────────────────────────────────

pub struct Gateway {
    pub addr: SocketAddr,
    pub state: AppState,
    stop: Option<oneshot::Sender<()>>,
    served: Option<JoinHandle<()>>,
}

impl Gateway {
    pub async fn start(backend: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(GatewayConfig::for_backend(backend));
        let (stop, stopped) = oneshot::channel::<()>();

        let serve_state = state.clone();
        let served = tokio::spawn(async move {
            let _ = bridge_server::serve(listener, serve_state, async move {
                let _ = stopped.await;
            })
            .await;
        });

        Self {
            addr,
            state,
            stop: Some(stop),
            served: Some(served),
        }
    }

    pub async fn connect(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("gateway unreachable");
        ws
    }

    /// Plain HTTP/1.1 GET; returns the response body.
    pub async fn get(&self, path: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        tokio::time::timeout(WAIT, stream.read_to_string(&mut response))
            .await
            .expect("no HTTP response")
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default()
    }

    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Waits for `serve` to return after [`shutdown`](Self::shutdown).
    pub async fn stopped(&mut self) {
        if let Some(served) = self.served.take() {
            tokio::time::timeout(WAIT, served)
                .await
                .expect("gateway never stopped")
                .unwrap();
        }
    }
}

// ─── Client Helpers ─────────────────────────────────────────────

pub async fn send_json(ws: &mut Client, json: &str) {
    ws.send(Message::Text(json.to_string().into())).await.unwrap();
}

pub async fn send_command(ws: &mut Client, command: &str) {
    let frame = serde_json::json!({ "type": "command", "command": command });
    send_json(ws, &frame.to_string()).await;
}

/// Next envelope from the gateway; `None` once the socket is closed.
pub async fn next_envelope(ws: &mut Client) -> Option<Envelope> {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no frame from gateway");
        match frame {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).expect("envelope JSON"))
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Asserts nothing arrives within `window`.
pub async fn expect_silence(ws: &mut Client, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(window, ws.next()).await {
        panic!("unexpected frame: {}", text.as_str());
    }
}
