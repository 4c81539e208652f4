//! # Client Message Dispatcher
//!
//! Interprets inbound client frames. The only recognized frame is
//! `{"type": "command", "command": "<string>"}`, which is forwarded to the
//! backend verbatim. Frames with any other `type` are ignored so clients can
//! add event types without breaking older gateways. Anything that is not a
//! JSON object with a string `type`, or a `command` frame without a string
//! `command`, is answered with `error{message: "invalid message format"}`.

use crate::backend::BackendHandle;
use crate::error::BridgeError;
use crate::state::ClientTx;
use bridge_protocol::ClientFrame;
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of interpreting one client frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A backend command to forward.
    Command(String),
    /// A well-formed frame of a type this gateway does not handle.
    Ignored(String),
}

pub fn interpret(raw: &str) -> Result<Inbound, BridgeError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| BridgeError::InvalidFrame)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(BridgeError::InvalidFrame)?;
    if kind != "command" {
        return Ok(Inbound::Ignored(kind.to_string()));
    }
    match serde_json::from_value(value) {
        Ok(ClientFrame::Command { command }) => Ok(Inbound::Command(command)),
        Err(_) => Err(BridgeError::InvalidFrame),
    }
}

/// Handles one client text frame for the session owning `backend`.
pub fn dispatch(conn_id: &str, raw: &str, backend: &BackendHandle, tx: &ClientTx) {
    match interpret(raw) {
        Ok(Inbound::Command(command)) => {
            debug!(%conn_id, "Forwarding command: {}", command);
            backend.send(&command);
        }
        Ok(Inbound::Ignored(kind)) => {
            debug!(%conn_id, "Ignoring client frame of type {:?}", kind);
        }
        Err(e) => {
            warn!(%conn_id, "Rejected client frame: {}", e);
            let _ = tx.send(e.to_envelope());
        }
    }
}
