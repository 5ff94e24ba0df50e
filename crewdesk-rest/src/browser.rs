//! Session-scoped browser endpoints.
//!
//! The same page registry the browser tools use, driven directly. Gated by
//! the server's browser ceiling and the admin role, mirroring what the
//! capability policy would grant a `power` preset request.

use axum::extract::State;
use axum::Json;
use crewdesk_store::artifacts::NewArtifactRecord;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Principal;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BrowserRequest {
    pub session_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

fn authorize(state: &AppState, principal: &Principal) -> Result<(), ApiError> {
    if !state.settings.ceiling.browser {
        return Err(ApiError::PermissionDenied(
            "browser capability is disabled on this server".to_string(),
        ));
    }
    if !principal.team_role.can_enable_dangerous() {
        return Err(ApiError::PermissionDenied(
            "browser control requires the owner or admin role".to_string(),
        ));
    }
    Ok(())
}

/// Scope the page key to the caller's team so two teams with the same
/// session id cannot share a page.
fn page_key(principal: &Principal, session_id: &str) -> String {
    format!("{}:{session_id}", principal.team_id)
}

pub async fn start(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<BrowserRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &principal)?;
    state
        .browser
        .start(&page_key(&principal, &request.session_id))
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn navigate(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<BrowserRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &principal)?;
    let url = request
        .url
        .as_deref()
        .ok_or_else(|| ApiError::Validation("url is required".to_string()))?;
    state
        .browser
        .navigate(&page_key(&principal, &request.session_id), url)
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(Json(json!({ "ok": true, "url": url })))
}

pub async fn screenshot(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<BrowserRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &principal)?;
    let (url, bytes) = state
        .browser
        .screenshot(&page_key(&principal, &request.session_id))
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let stored = state
        .artifacts
        .register(NewArtifactRecord {
            kind: "generated".to_string(),
            filename: "screenshot.png".to_string(),
            content_type: "image/png".to_string(),
            bytes,
            team_id: principal.team_id,
            user_id: principal.user_id,
            project_id: None,
            session_id: Some(request.session_id.clone()),
        })
        .await?;

    Ok(Json(json!({
        "file_id": stored.file_id,
        "download_url": stored.download_url,
        "preview_url": stored.preview_url,
        "url": url,
    })))
}
