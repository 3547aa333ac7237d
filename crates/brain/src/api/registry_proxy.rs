//! Proxy for the public MCP server registry, so browser clients never talk
//! to it directly.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;

const PROXY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REGISTRY_URL: &str = "https://registry.modelcontextprotocol.io/v0/servers";

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

pub async fn search(
    State(_state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    let term = query.search.trim();
    let len = term.chars().count();
    if !(2..=200).contains(&len) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "search must be between 2 and 200 characters",
            })),
        )
            .into_response();
    }

    let base = std::env::var("MCP_REGISTRY_URL")
        .unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string());

    let client = reqwest::Client::new();
    let result = client
        .get(&base)
        .query(&[("search", term)])
        .timeout(PROXY_TIMEOUT)
        .send()
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(serde_json::json!({ "error": "registry timed out" })),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": format!("registry unreachable: {e}") })),
            )
                .into_response();
        }
    };

    if !resp.status().is_success() {
        return (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "error": format!("registry returned HTTP {}", resp.status().as_u16()),
            })),
        )
            .into_response();
    }

    match resp.json::<serde_json::Value>().await {
        Ok(body) => Json(body).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": format!("bad registry payload: {e}") })),
        )
            .into_response(),
    }
}
