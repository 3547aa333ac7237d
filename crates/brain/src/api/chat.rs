//! Chat endpoints: non-streaming, SSE streaming, and the WebSocket mirror.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::runtime::{self, AgentEvent, ChatOptions};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

fn validate(body: &ChatBody) -> Result<(String, ChatOptions), (StatusCode, Json<serde_json::Value>)> {
    match body.message.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => Ok((
            message.to_string(),
            ChatOptions {
                conversation_id: body.conversation_id.clone(),
                channel: body.channel.clone(),
            },
        )),
        _ => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing message" })),
        )),
    }
}

// ── POST /chat ─────────────────────────────────────────────────────

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> impl IntoResponse {
    let (message, opts) = match validate(&body) {
        Ok(v) => v,
        Err(resp) => return resp.into_response(),
    };
    match runtime::chat(state, message, opts).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => super::ApiError(e).into_response(),
    }
}

// ── POST /chat/stream (SSE) ────────────────────────────────────────

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    let (message, opts) = match validate(&body) {
        Ok(v) => v,
        Err(resp) => return resp.into_response(),
    };

    let mut rx = runtime::chat_stream(state, message, opts);
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok::<_, std::convert::Infallible>(Event::default().data(data));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ── GET /chat/ws ───────────────────────────────────────────────────

/// WebSocket mirror of the SSE stream: the client sends one JSON chat body
/// per turn; events come back as JSON text frames.
pub async fn chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    while let Some(Ok(frame)) = socket.recv().await {
        let text = match frame {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let body: ChatBody = match serde_json::from_str(&text) {
            Ok(b) => b,
            Err(e) => {
                let _ = send_ws_json(
                    &mut socket,
                    &AgentEvent::Error {
                        message: format!("bad request: {e}"),
                    },
                )
                .await;
                continue;
            }
        };
        let (message, opts) = match validate(&body) {
            Ok(v) => v,
            Err(_) => {
                let _ = send_ws_json(
                    &mut socket,
                    &AgentEvent::Error {
                        message: "missing message".into(),
                    },
                )
                .await;
                continue;
            }
        };

        let mut rx = runtime::chat_stream(state.clone(), message, opts);
        while let Some(event) = rx.recv().await {
            if send_ws_json(&mut socket, &event).await.is_err() {
                return;
            }
        }
    }
}

async fn send_ws_json(socket: &mut WebSocket, event: &AgentEvent) -> Result<(), axum::Error> {
    let data = serde_json::to_string(event).unwrap_or_default();
    socket.send(WsMessage::Text(data)).await
}
