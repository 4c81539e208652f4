//! Line-oriented console for the bridge gateway: every stdin line is sent as
//! a command, every envelope received is printed as JSON.

use bridge_client::{
    Callback, ClientConfig, ClientError, EventKind, ReconnectPolicy, Reconnector, Supervisor,
};
use bridge_protocol::Envelope;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "bridge-console", about = "Send backend commands through the bridge gateway")]
struct Args {
    /// Gateway WebSocket URL.
    #[arg(long, env = "BRIDGE_URL", default_value = bridge_client::config::DEFAULT_GATEWAY_URL)]
    url: String,

    /// Pause before each reconnect attempt, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    retry_delay_ms: u64,

    /// Consecutive reconnect attempts before giving up.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        ClientConfig {
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(self.retry_delay_ms),
                max_attempts: self.max_attempts,
            },
            ..ClientConfig::new(self.url)
        }
    }
}

fn print_envelope(envelope: &Envelope) {
    match serde_json::to_string(envelope) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("Unprintable envelope: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config();
    let supervisor = Supervisor::new(config.url.clone());
    supervisor.on(EventKind::Message, print_envelope);

    let report: Callback = Arc::new(|envelope: &Envelope| eprintln!("{envelope:?}"));
    let reconnector = Reconnector::install(&supervisor, config.reconnect, Some(report));

    match supervisor.connect().await {
        Ok(()) => info!("Connected to {}", config.url),
        Err(err) => {
            warn!(%err, "Initial connection failed");
            reconnector.trigger();
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let command = line.trim();
                    if !command.is_empty() {
                        supervisor.send_command(command).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(reconnector);
    supervisor.disconnect();
    // let the close frame go out
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
