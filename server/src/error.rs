//! # Gateway Errors
//!
//! Failures that can occur while bridging a session. None of these ever
//! leave the session that produced them: each one is turned into an
//! [`Envelope::Error`] for the affected client via [`BridgeError::to_envelope`].

use bridge_protocol::Envelope;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Dialing the backend failed.
    #[error("Error connecting to server: {0}")]
    Dial(#[source] io::Error),

    /// The upstream socket failed after it was established.
    #[error("Upstream connection error: {0}")]
    Upstream(#[source] io::Error),

    /// A command arrived while the upstream was not writable.
    #[error("not connected to server")]
    NotConnected,

    /// The client frame was not JSON or not a well-formed command.
    #[error("invalid message format")]
    InvalidFrame,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

impl BridgeError {
    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.to_string())
    }
}
