//! Webhook: external systems dispatch jobs with one POST.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use bs_store::JobType;

use crate::jobs::dispatcher::DispatchParams;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub vars: Option<serde_json::Value>,
    #[serde(default, rename = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
}

pub async fn dispatch(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> impl IntoResponse {
    let Some(job_type) = JobType::parse(&body.job_type) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("invalid type '{}'", body.job_type),
            })),
        )
            .into_response();
    };

    let result = state
        .dispatcher
        .dispatch(DispatchParams {
            job_type,
            source: "webhook".into(),
            job: body.job,
            command: body.command,
            url: body.url,
            method: body.method,
            headers: body.headers,
            vars: body.vars,
            timeout_secs: body.timeout_secs,
        })
        .await;

    match result {
        Ok(dispatch) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "jobId": dispatch.job_id,
                "status": "dispatched",
            })),
        )
            .into_response(),
        Err(e) => super::ApiError(e).into_response(),
    }
}
