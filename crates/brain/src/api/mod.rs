//! HTTP surface of the brain.
//!
//! Routes split into **public** (`/ping`, `/brain/state`) and **protected**
//! (everything else): protected routes sit behind the draining gate and the
//! bearer-token middleware.

pub mod auth;
pub mod chat;
pub mod conversations;
pub mod health;
pub mod jobs;
pub mod registry_proxy;
pub mod schedules;
pub mod secrets;
pub mod skills;
pub mod webhook;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{extract::State, Json, Router};

use bs_domain::Error;

use crate::state::AppState;

/// Error wrapper mapping the domain taxonomy onto HTTP statuses.
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Unavailable(_) | Error::BreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Build the full API router.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/ping", get(health::ping))
        .route("/brain/state", get(health::brain_state));

    let protected = Router::new()
        // Job dispatch + inspection
        .route("/webhook", post(webhook::dispatch))
        .route("/jobs", get(jobs::list))
        .route("/jobs/:id/status", get(jobs::status))
        // Chat (core runtime)
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/ws", get(chat::chat_ws))
        // Conversations
        .route("/conversations", get(conversations::list))
        .route(
            "/conversations/:id/messages",
            get(conversations::messages),
        )
        // Skills
        .route("/skills", get(skills::list).post(skills::create))
        .route(
            "/skills/:id",
            get(skills::get_one).put(skills::update).delete(skills::remove),
        )
        // Schedules
        .route("/schedules", get(schedules::list).post(schedules::create))
        .route(
            "/schedules/:id",
            get(schedules::get_one)
                .put(schedules::update)
                .delete(schedules::remove),
        )
        .route("/schedules/:id/trigger", post(schedules::trigger))
        // Secrets (write-only values)
        .route("/secrets", get(secrets::list))
        .route(
            "/secrets/:name",
            put(secrets::set).delete(secrets::remove),
        )
        // MCP registry proxy
        .route("/mcps/registry", get(registry_proxy::search))
        // Auth first (inner), then the draining gate (outer).
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .route_layer(middleware::from_fn_with_state(
            state,
            reject_while_draining,
        ));

    public
        .merge(protected)
        .layer(middleware::from_fn(options_no_content))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Every non-health, non-state request is refused while the brain drains.
async fn reject_while_draining(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.machine.is_accepting_requests() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "service draining",
                "state": state.machine.state().as_str(),
            })),
        )
            .into_response();
    }
    next.run(req).await
}

/// Bare OPTIONS requests answer 204 (CORS preflights are handled by the
/// CORS layer before they reach this).
async fn options_no_content(req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}
