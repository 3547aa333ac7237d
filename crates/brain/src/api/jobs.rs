use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use bs_domain::Error;

use super::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "d_limit")]
    pub limit: usize,
}

fn d_limit() -> usize {
    100
}

impl Default for ListQuery {
    fn default() -> Self {
        Self { limit: d_limit() }
    }
}

pub async fn list(
    State(state): State<AppState>,
    query: Option<Query<ListQuery>>,
) -> ApiResult<Json<serde_json::Value>> {
    let Query(query) = query.unwrap_or_default();
    let jobs = state.store.list_jobs(query.limit)?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state
        .store
        .get_job(&id)?
        .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
    Ok(Json(serde_json::json!({
        "jobId": job.job_id,
        "status": job.status,
        "workerId": job.worker_id,
        "result": job.result,
        "error": job.error,
        "durationMs": job.duration_ms,
        "updatedAt": job.updated_at,
    })))
}
