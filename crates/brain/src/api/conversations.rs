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
    let conversations = state.store.list_recent_conversations(query.limit)?;
    Ok(Json(serde_json::json!({ "conversations": conversations })))
}

pub async fn messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let conversation = state
        .store
        .get_conversation(&id)?
        .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
    let messages = state.store.messages_for_conversation(&id)?;
    Ok(Json(serde_json::json!({
        "conversation": conversation,
        "messages": messages,
    })))
}
