//! Client configuration.

use crate::reconnect::ReconnectPolicy;

/// Gateway URL used when none is given.
pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:4000";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway WebSocket URL (e.g. "ws://1.2.3.4:4000/ws").
    pub url: String,

    /// Retry behavior used by [`Reconnector`](crate::reconnect::Reconnector).
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
