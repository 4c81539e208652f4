//! Client-side failures. All of them are `Clone` so a single connection
//! attempt can report the same outcome to every caller awaiting it.

use bridge_protocol::Envelope;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("invalid gateway URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("WebSocket connection failed: {0}")]
    Transport(String),

    #[error("not connected to gateway")]
    NotConnected,

    #[error("gave up reconnecting after {0} attempts")]
    Exhausted(u32),
}

impl ClientError {
    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.to_string())
    }
}
