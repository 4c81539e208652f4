//! # REST API Endpoints
//!
//! Plain HTTP endpoints served next to the WebSocket upgrade.

use crate::session::SessionState;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

/// `GET /health`: liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Server is running" }))
}

/// Response item representing a single live session.
#[derive(Serialize)]
pub struct SessionListItem {
    pub session_id: String,
    pub state: SessionState,
    /// Whether commands can currently reach the backend.
    pub upstream_writable: bool,
}

/// `GET /api/sessions`: every session currently in the registry.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionListItem>> {
    let sessions: Vec<SessionListItem> = state
        .sessions
        .iter()
        .map(|entry| SessionListItem {
            session_id: entry.key().clone(),
            state: entry.lifecycle.current(),
            upstream_writable: entry.backend.is_writable(),
        })
        .collect();
    Json(sessions)
}
