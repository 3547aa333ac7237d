//! Named secrets. Values are write-only through this surface: listing
//! returns names, never values.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use bs_domain::Error;

use super::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SecretBody {
    pub value: String,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let names = state.store.list_secret_names()?;
    Ok(Json(serde_json::json!({ "secrets": names })))
}

pub async fn set(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SecretBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if name.trim().is_empty() {
        return Err(Error::Validation("secret name must not be empty".into()).into());
    }
    state.store.set_secret(&name, &body.value)?;
    Ok(Json(serde_json::json!({ "name": name })))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.store.delete_secret(&name)? {
        return Err(Error::NotFound(format!("secret {name}")).into());
    }
    Ok(Json(serde_json::json!({ "deleted": name })))
}
