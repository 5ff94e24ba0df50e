//! Direct generator endpoints.
//!
//! These bypass the model entirely but run the same generator tools over
//! the same registry path, so validation, artifact registration, and the
//! workspace mirror behave identically to tool-driven generation.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use crewdesk_core::error::ToolError;
use crewdesk_core::policy::CapabilitySet;
use crewdesk_core::sandbox::WorkspaceSandbox;
use crewdesk_tools::context::{ToolCtx, ToolLimits};
use crewdesk_tools::registry::RegistryDispatcher;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::artifacts_bridge::StoreArtifactRegistrar;
use crate::auth::Principal;
use crate::chat::resolve_workspace_root;
use crate::error::ApiError;
use crate::AppState;

fn tool_error_to_api(err: ToolError) -> ApiError {
    match err {
        ToolError::InvalidArguments { reason, .. } => ApiError::Validation(reason),
        ToolError::NotFound { name } => ApiError::Internal(format!("tool missing: {name}")),
        other => ApiError::Internal(other.to_string()),
    }
}

async fn run_generator(
    state: AppState,
    principal: Principal,
    tool: &str,
    payload: Value,
) -> Result<Json<Value>, ApiError> {
    let (workspace_root, project_id) = resolve_workspace_root(&state, &principal, None)?;
    let _ = tokio::fs::create_dir_all(&workspace_root).await;

    let ctx = ToolCtx {
        team_id: principal.team_id,
        user_id: principal.user_id,
        session_id: None,
        project_id,
        workspace: WorkspaceSandbox::new(&workspace_root),
        effective: CapabilitySet::NONE,
        limits: ToolLimits {
            max_file_read_chars: state.settings.max_file_read_chars,
            max_tool_output_chars: state.settings.max_tool_output_chars,
        },
        artifacts: Arc::new(StoreArtifactRegistrar::new(state.artifacts.clone())),
        renderer: state.renderer.clone(),
        browser: state.browser.clone(),
        cancel: CancellationToken::new(),
    };

    let dispatcher = RegistryDispatcher::new(state.registry.clone(), ctx);
    let args = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
    let result = crewdesk_core::agent::ToolDispatcher::dispatch(&dispatcher, tool, &args)
        .await
        .map_err(tool_error_to_api)?;
    Ok(Json(result))
}

pub async fn create_ppt(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_generator(state, principal, "doc_pptx_create", payload).await
}

pub async fn create_quote_docx(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_generator(state, principal, "doc_quote_docx_create", payload).await
}

pub async fn create_quote_xlsx(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_generator(state, principal, "doc_quote_xlsx_create", payload).await
}

pub async fn create_inspection_docx(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_generator(state, principal, "doc_inspection_docx_create", payload).await
}

pub async fn create_inspection_xlsx(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_generator(state, principal, "doc_inspection_xlsx_create", payload).await
}

pub async fn generate_prototype(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_generator(state, principal, "proto_generate", payload).await
}
