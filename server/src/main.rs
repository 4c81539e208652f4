use bridge_server::{lifecycle, AppState, BridgeError, GatewayConfig};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_server=info".into()),
        )
        .init();

    let config = GatewayConfig::parse();
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| BridgeError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!("Bridge listening on {}", addr);
    info!("Forwarding to backend at {}", config.upstream_addr());

    bridge_server::serve(listener, AppState::new(config), lifecycle::shutdown_signal()).await?;
    info!("Bridge shut down");
    Ok(())
}
