//! HTTP endpoints: actions, status, health and event polling

use crate::AppState;
use axum::Json;
use axum::extract::State;
use gateway_core::ActionRequest;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// `POST /action` with `{"actions": [...]}`.
///
/// Exactly one upstream request per call, whatever the batch size. The
/// reply is whatever the bridge resolved: game state, a stale snapshot,
/// an `Error` event or the crash record.
pub async fn handle_action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActionRequest>,
) -> Json<Value> {
    debug!("POST /action with {} action(s)", request.actions.len());
    Json(state.bridge.handle_request(request.actions).await)
}

/// `GET /status` with a live snapshot of both halves of the gateway
pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "godot_running": state.process.is_running().await,
        "ws_connected": state.bridge.is_connected(),
        "crashed": state.bridge.has_crashed(),
        "visual_mode": state.visual_mode,
        "http_port": state.http_port,
        "godot_ws_port": state.godot_ws_port,
    }))
}

/// `GET /health`, liveness only
pub async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /events` drains the queue of unsolicited events for callers that
/// poll instead of holding a WebSocket open
pub async fn handle_events(State(state): State<Arc<AppState>>) -> Json<Value> {
    let events = state.bridge.drain_observations();
    Json(json!({ "events": events }))
}
