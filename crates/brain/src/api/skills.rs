//! Skill CRUD. Creating or updating an enabled tier ≥ 1 skill connects it in
//! the background; a failed connection leaves the row in place (the registry
//! logs and skips, same as at startup).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use bs_domain::Error;
use bs_store::SkillRow;

use super::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillBody {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "d_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub tier: i64,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_config")]
    pub config: serde_json::Value,
    #[serde(default)]
    pub stdio_command: Option<String>,
    #[serde(default)]
    pub stdio_args: Vec<String>,
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub instruction_path: Option<String>,
    #[serde(default)]
    pub instruction_content: Option<String>,
    #[serde(default = "d_owner")]
    pub owner: String,
    #[serde(default)]
    pub tags: Option<String>,
}

fn d_version() -> String {
    "0.1.0".into()
}
fn d_true() -> bool {
    true
}
fn d_config() -> serde_json::Value {
    serde_json::json!({})
}
fn d_owner() -> String {
    "system".into()
}

impl SkillBody {
    fn into_row(self, id: String) -> SkillRow {
        SkillRow {
            id,
            name: self.name,
            version: self.version,
            description: self.description,
            tier: self.tier,
            transport: self.transport,
            enabled: self.enabled,
            config: self.config,
            stdio_command: self.stdio_command,
            stdio_args: self.stdio_args,
            http_url: self.http_url,
            instruction_path: self.instruction_path,
            instruction_content: self.instruction_content,
            owner: self.owner,
            tags: self.tags,
        }
    }
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let skills = state.store.list_skills(false)?;
    Ok(Json(serde_json::json!({ "skills": skills })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SkillRow>> {
    let skill = state
        .store
        .get_skill(&id)?
        .ok_or_else(|| Error::NotFound(format!("skill {id}")))?;
    Ok(Json(skill))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<SkillBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = body
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let row = body.into_row(id);
    state.store.upsert_skill(&row)?;
    connect_in_background(&state, row.clone());
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SkillBody>,
) -> ApiResult<Json<SkillRow>> {
    if state.store.get_skill(&id)?.is_none() {
        return Err(Error::NotFound(format!("skill {id}")).into());
    }
    let row = body.into_row(id.clone());
    state.store.upsert_skill(&row)?;

    // Reconnect with the new definition.
    let registry = state.registry.clone();
    let reconnect = row.clone();
    tokio::spawn(async move {
        let _ = registry.skills().disconnect_skill(&reconnect.id).await;
        if reconnect.enabled && reconnect.tier >= 1 {
            if let Err(e) = registry.skills().connect_and_register(reconnect.clone()).await {
                tracing::warn!(skill = %reconnect.id, error = %e, "skill reconnect failed");
            }
        }
    });
    Ok(Json(row))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.store.delete_skill(&id)? {
        return Err(Error::NotFound(format!("skill {id}")).into());
    }
    let _ = state.registry.skills().disconnect_skill(&id).await;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

fn connect_in_background(state: &AppState, row: SkillRow) {
    if !(row.enabled && row.tier >= 1) {
        return;
    }
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let id = row.id.clone();
        if let Err(e) = registry.skills().connect_and_register(row).await {
            tracing::warn!(skill = %id, error = %e, "skill connection failed");
        }
    });
}
