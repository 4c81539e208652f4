//! # Bridge Server
//!
//! Gateway between browser clients speaking JSON over WebSocket and a
//! backend speaking a newline-delimited text/JSON protocol over TCP.
//!
//! ```text
//! Browser ──WS──▶ handlers ──▶ dispatcher ──▶ backend ──TCP──▶ Backend
//! Browser ◀──WS── handlers ◀── decoder    ◀── backend ◀──TCP── Backend
//! ```
//!
//! Each WebSocket connection gets exactly one upstream connection. Sessions
//! share nothing but the registry in [`state::AppState`].

pub mod api;
pub mod backend;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod session;
pub mod state;

use axum::{routing::get, Router};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::warn;

pub use config::GatewayConfig;
pub use error::BridgeError;
pub use state::AppState;

/// Builds the gateway's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::ws_handler))
        .route("/ws", get(handlers::ws_handler))
        .route("/health", get(api::health))
        .route("/api/sessions", get(api::list_sessions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Upper bound on how long `serve` waits for swept sessions to finish
/// tearing down.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Serves the gateway on `listener` until `signal` resolves, then runs the
/// shutdown sweep over every live session.
///
/// Upgraded WebSocket connections are not tracked by axum's graceful
/// shutdown, so this also waits for every session driver to finish.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> Result<(), BridgeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweep = state.clone();
    let served = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async move {
            signal.await;
            sweep.shutdown_all();
        })
        .await;

    if tokio::time::timeout(DRAIN_TIMEOUT, drain(&state)).await.is_err() {
        warn!(remaining = state.live_sessions(), "Sessions still open at exit");
    }
    served.map_err(BridgeError::Serve)
}

async fn drain(state: &AppState) {
    while state.live_sessions() > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
