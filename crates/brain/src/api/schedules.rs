use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use bs_domain::Error;
use bs_store::{JobType, ScheduleRow};

use super::{ApiError, ApiResult};
use crate::sched::CreateSchedule;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub name: String,
    pub schedule: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

fn d_true() -> bool {
    true
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let schedules = state.scheduler.list()?;
    Ok(Json(serde_json::json!({ "schedules": schedules })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduleRow>> {
    let schedule = state
        .scheduler
        .get(&id)?
        .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;
    Ok(Json(schedule))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<ScheduleBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job_type = JobType::parse(&body.job_type)
        .ok_or_else(|| Error::Validation(format!("invalid type '{}'", body.job_type)))?;
    let row = state.scheduler.create(CreateSchedule {
        name: body.name,
        schedule: body.schedule,
        job_type,
        config: body.config,
        enabled: body.enabled,
    })?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Partial update: only the listed keys are applied.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<ScheduleRow>> {
    let object = body
        .as_object()
        .ok_or_else(|| Error::Validation("expected a JSON object".into()))?;

    let mut updates = Vec::new();
    for (key, value) in object {
        let column = match key.as_str() {
            "name" | "schedule" | "config" | "enabled" => key.clone(),
            "type" => {
                let type_str = value
                    .as_str()
                    .and_then(JobType::parse)
                    .ok_or_else(|| Error::Validation(format!("invalid type '{value}'")))?;
                updates.push((
                    "job_type".to_string(),
                    serde_json::json!(type_str.as_str()),
                ));
                continue;
            }
            other => {
                return Err(Error::Validation(format!(
                    "field '{other}' is not updatable"
                ))
                .into())
            }
        };
        updates.push((column, value.clone()));
    }

    let row = state
        .scheduler
        .update(&id, &updates)?
        .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;
    Ok(Json(row))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.scheduler.delete(&id)? {
        return Err(Error::NotFound(format!("schedule {id}")).into());
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// Manual one-shot fire.
pub async fn trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let job_id = state.scheduler.trigger(&id).await?;
    Ok(Json(serde_json::json!({ "jobId": job_id })))
}
