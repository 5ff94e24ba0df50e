//! File upload, tokenized download, and preview.
//!
//! Downloads authenticate with the signed token alone - the URL is the
//! credential, so generated links work from chat transcripts. Uploads and
//! deletes require a principal.

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use crewdesk_store::artifacts::NewArtifactRecord;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Principal;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenParam {
    pub token: String,
}

async fn read_upload(mut multipart: Multipart) -> Result<(String, String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload.bin".to_string());
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ApiError::Validation("uploaded file is empty".to_string()));
        }
        return Ok((filename, content_type, bytes.to_vec()));
    }
    Err(ApiError::Validation("missing 'file' field".to_string()))
}

async fn register_upload(
    state: &AppState,
    principal: &Principal,
    kind: &str,
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
) -> Result<Json<Value>, ApiError> {
    let stored = state
        .artifacts
        .register(NewArtifactRecord {
            kind: kind.to_string(),
            filename,
            content_type,
            bytes,
            team_id: principal.team_id,
            user_id: principal.user_id,
            project_id: None,
            session_id: None,
        })
        .await?;
    Ok(Json(serde_json::to_value(&stored).unwrap_or(json!({}))))
}

pub async fn upload_image(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let (filename, content_type, bytes) = read_upload(multipart).await?;
    if !content_type.to_ascii_lowercase().starts_with("image/") {
        return Err(ApiError::Validation("expected an image upload".to_string()));
    }
    register_upload(&state, &principal, "image", filename, content_type, bytes).await
}

pub async fn upload_file(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let (filename, content_type, bytes) = read_upload(multipart).await?;
    register_upload(&state, &principal, "file", filename, content_type, bytes).await
}

fn file_response(
    path: std::path::PathBuf,
    content_type: String,
    filename: String,
    inline: bool,
) -> Result<Response, ApiError> {
    let bytes = std::fs::read(&path).map_err(|_| ApiError::NotFound("file missing".to_string()))?;
    let disposition = if inline {
        "inline".to_string()
    } else {
        format!("attachment; filename=\"{}\"", filename.replace('"', ""))
    };
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}

pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(params): Query<TokenParam>,
) -> Result<Response, ApiError> {
    let (path, content_type, filename) = state
        .artifacts
        .resolve_for_download(&file_id, &params.token)
        .map_err(|e| match e {
            crewdesk_store::StoreError::Auth(message) => ApiError::PermissionDenied(message),
            other => ApiError::from(other),
        })?;
    file_response(path, content_type, filename, false)
}

fn previewable(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.starts_with("image/") || ct.contains("html") || ct.contains("json")
}

pub async fn preview(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(params): Query<TokenParam>,
) -> Result<Response, ApiError> {
    let (path, content_type, filename) = state
        .artifacts
        .resolve_for_download(&file_id, &params.token)
        .map_err(|e| match e {
            crewdesk_store::StoreError::Auth(message) => ApiError::PermissionDenied(message),
            other => ApiError::from(other),
        })?;
    if !previewable(&content_type) {
        return Err(ApiError::Validation(
            "this file type has no inline preview".to_string(),
        ));
    }
    file_response(path, content_type, filename, true)
}

pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.artifacts.delete(&file_id, principal.team_id).await?;
    Ok(Json(json!({ "ok": true })))
}
