//! Health and state probes. Both bypass auth and the draining gate.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    if !state.machine.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "not ready",
                "state": state.machine.state().as_str(),
            })),
        )
            .into_response();
    }
    Json(serde_json::json!({
        "service": state.config.server.agent_name,
        "version": state.machine.version(),
        "state": state.machine.state().as_str(),
        "uptimeSecs": state.machine.uptime_secs(),
        "extensionsOnline": state.extensions.online_count(),
    }))
    .into_response()
}

pub async fn brain_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "state": state.machine.state().as_str(),
        "version": state.machine.version(),
        "uptime": state.machine.uptime_secs(),
    }))
}
