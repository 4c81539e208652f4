//! # Bridge Protocol Messages
//!
//! Wire types shared by the gateway and its clients. Every frame on the
//! client-facing socket is a JSON text frame using serde's internally-tagged
//! representation (`"type": "..."` field).
//!
//! - [`Envelope`]: gateway → client
//! - [`ClientFrame`]: client → gateway

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status carried by a `connection` envelope.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Normalized message sent from the gateway to a client.
///
/// Consumers dispatch on the `type` tag. `Envelope::Error { .. }` serializes
/// to `{"type": "error", "message": "..."}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    // ── Upstream Lifecycle ────────────────────────────────────────

    /// The upstream connection for this session opened or closed.
    Connection {
        status: ConnectionStatus,
        message: String,
    },

    // ── Backend Replies ───────────────────────────────────────────

    /// One decoded backend reply.
    ///
    /// `message` is the parsed JSON document when the line was valid JSON,
    /// otherwise the trimmed text. `response` always carries the trimmed
    /// text. `status` and `token` are only set by synchronous marker
    /// replies such as the login acknowledgement.
    Server {
        message: Value,
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    // ── Error ─────────────────────────────────────────────────────

    /// Error notification with a human-readable message.
    Error { message: String },
}

impl Envelope {
    pub fn connected(message: impl Into<String>) -> Self {
        Envelope::Connection {
            status: ConnectionStatus::Connected,
            message: message.into(),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Envelope::Connection {
            status: ConnectionStatus::Disconnected,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    /// A backend line that was not valid JSON.
    pub fn text(line: impl Into<String>) -> Self {
        let line = line.into();
        Envelope::Server {
            message: Value::String(line.clone()),
            response: line,
            status: None,
            token: None,
        }
    }

    /// A backend line that parsed as JSON. `raw` is the trimmed source text.
    pub fn json(value: Value, raw: impl Into<String>) -> Self {
        Envelope::Server {
            message: value,
            response: raw.into(),
            status: None,
            token: None,
        }
    }

    /// The `type` tag this envelope serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Connection { .. } => "connection",
            Envelope::Server { .. } => "server",
            Envelope::Error { .. } => "error",
        }
    }
}

/// Frames a client sends to the gateway.
///
/// The gateway parses inbound frames leniently (unknown `type` values are
/// ignored), so this enum is the canonical shape clients should produce.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// An opaque backend command, e.g. `"LOGIN alice secret"`.
    Command { command: String },
}
