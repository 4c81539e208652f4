//! # Gateway Configuration
//!
//! Recognized options:
//!
//! | flag             | env            | default     |
//! |------------------|----------------|-------------|
//! | `--port`         | `PORT`         | `4000`      |
//! | `--bind`         |                | `0.0.0.0`   |
//! | `--backend-host` | `BACKEND_HOST` | `127.0.0.1` |
//! | `--backend-port` | `BACKEND_PORT` | `8080`      |

use clap::Parser;
use std::net::SocketAddr;

#[derive(Debug, Clone, Parser)]
#[command(name = "bridge-server", version, about = "WebSocket to backend line-protocol bridge")]
pub struct GatewayConfig {
    /// Port for the client-facing WebSocket endpoint.
    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    /// Interface the client-facing endpoint binds to.
    #[arg(long = "bind", default_value = "0.0.0.0")]
    pub bind_host: String,

    /// Host of the backend line-protocol server.
    #[arg(long, env = "BACKEND_HOST", default_value = "127.0.0.1")]
    pub backend_host: String,

    /// Port of the backend line-protocol server.
    #[arg(long, env = "BACKEND_PORT", default_value_t = 8080)]
    pub backend_port: u16,
}

impl GatewayConfig {
    /// `host:port` of the upstream, as passed to `TcpStream::connect`.
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Configuration pointing at a specific backend, everything else default.
    pub fn for_backend(addr: SocketAddr) -> Self {
        Self {
            backend_host: addr.ip().to_string(),
            backend_port: addr.port(),
            ..Self::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_host: "0.0.0.0".to_string(),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 8080,
        }
    }
}
