//! History endpoints: sessions, files, and grep-style search.

use axum::extract::{Path, Query, State};
use axum::Json;
use crewdesk_core::types::SessionId;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Principal;
use crate::chat::resolve_workspace_root;
use crate::error::ApiError;
use crate::AppState;

pub async fn list_sessions(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let sessions = state.db.list_sessions(principal.team_id)?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn get_session(
    State(state): State<AppState>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .db
        .get_session(principal.team_id, &session_id)?
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;
    let messages = state.db.session_messages(principal.team_id, &session_id)?;
    Ok(Json(json!({ "session": session, "messages": messages })))
}

pub async fn delete_session(
    State(state): State<AppState>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.db.delete_session(principal.team_id, &session_id)?;
    state
        .sessions
        .remove(&SessionId(session_id.clone()))
        .await;
    state.snapshots.delete(principal.team_id, &session_id).await;
    Ok(Json(json!({ "ok": true })))
}

pub async fn list_files(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let files = state.db.list_files(principal.team_id, 200)?;
    Ok(Json(json!({ "files": files })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub include_workspace: Option<bool>,
    #[serde(default)]
    pub include_history: Option<bool>,
    #[serde(default)]
    pub sub_path: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn search(
    State(state): State<AppState>,
    principal: Principal,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(ApiError::Validation("q is required".to_string()));
    }
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let history_hits = if params.include_history.unwrap_or(true) {
        state.snapshots.search(principal.team_id, query, limit).await?
    } else {
        Vec::new()
    };

    let workspace_hits = if params.include_workspace.unwrap_or(false) {
        let (root, _) = resolve_workspace_root(&state, &principal, params.project_id)?;
        let sandbox = crewdesk_core::sandbox::WorkspaceSandbox::new(&root);
        let search_root = match params.sub_path.as_deref().filter(|p| !p.is_empty()) {
            Some(sub) => sandbox.resolve(sub)?,
            None => root.clone(),
        };
        crewdesk_store::snapshot::search_workspace(&search_root, query, limit)
            .await?
            .into_iter()
            .map(|(path, line)| json!({ "path": path, "line": line }))
            .collect()
    } else {
        Vec::new()
    };

    Ok(Json(json!({
        "query": query,
        "history": history_hits,
        "workspace": workspace_hits,
    })))
}
