//! Team configuration, projects, skills, and requirement delivery.

use axum::extract::{Path, State};
use axum::Json;
use crewdesk_store::requirements::RequirementUpdate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Principal;
use crate::error::ApiError;
use crate::AppState;

/// Editing team config requires the owner or admin role.
fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.team_role.can_enable_dangerous() {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied(
            "team configuration requires the owner or admin role".to_string(),
        ))
    }
}

// ==================== Settings ====================

pub async fn get_settings(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let workspace_path = state.db.team_workspace_path(principal.team_id)?;
    Ok(Json(json!({ "workspace_path": workspace_path })))
}

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub workspace_path: String,
}

pub async fn put_settings(
    State(state): State<AppState>,
    principal: Principal,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&principal)?;
    state
        .db
        .set_team_workspace_path(principal.team_id, update.workspace_path.trim())?;
    Ok(Json(json!({ "ok": true })))
}

// ==================== Projects ====================

pub async fn list_projects(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let projects = state.db.list_projects(principal.team_id)?;
    Ok(Json(json!({ "projects": projects })))
}

#[derive(Debug, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub path: String,
}

pub async fn create_project(
    State(state): State<AppState>,
    principal: Principal,
    Json(project): Json<NewProject>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&principal)?;
    let path = std::path::PathBuf::from(project.path.trim());
    let allowed = state
        .settings
        .projects_root_allowlist
        .iter()
        .any(|root| path == *root || path.starts_with(root));
    if !allowed {
        return Err(ApiError::Validation(
            "project path is outside the allowed roots".to_string(),
        ));
    }
    let slug = project
        .slug
        .unwrap_or_else(|| crewdesk_tools::builtin::docs::slugify(&project.name, "project"));
    let id = state.db.create_project(
        principal.team_id,
        project.name.trim(),
        &slug,
        &path.to_string_lossy(),
    )?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct EnabledUpdate {
    pub enabled: bool,
}

pub async fn set_project_enabled(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<i64>,
    Json(update): Json<EnabledUpdate>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&principal)?;
    state
        .db
        .set_project_enabled(principal.team_id, project_id, update.enabled)?;
    Ok(Json(json!({ "ok": true })))
}

// ==================== Skills ====================

pub async fn list_skills(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let skills = state.db.list_skills(principal.team_id)?;
    Ok(Json(json!({ "skills": skills })))
}

#[derive(Debug, Deserialize)]
pub struct NewSkill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
}

pub async fn create_skill(
    State(state): State<AppState>,
    principal: Principal,
    Json(skill): Json<NewSkill>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&principal)?;
    let id = state.db.create_skill(
        principal.team_id,
        skill.name.trim(),
        skill.description.trim(),
        &skill.content,
    )?;
    Ok(Json(json!({ "id": id })))
}

// ==================== Requirements ====================

pub async fn list_requirements(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    let requirements = state.db.list_requirements(principal.team_id)?;
    Ok(Json(json!({ "requirements": requirements })))
}

#[derive(Debug, Deserialize)]
pub struct NewRequirement {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
}

pub async fn create_requirement(
    State(state): State<AppState>,
    principal: Principal,
    Json(requirement): Json<NewRequirement>,
) -> Result<Json<Value>, ApiError> {
    let id = state.db.create_requirement(
        principal.team_id,
        requirement.project_id,
        requirement.title.trim(),
        requirement.description.trim(),
        requirement.priority.as_deref().unwrap_or("medium"),
    )?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct RequirementPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

pub async fn update_requirement(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(patch): Json<RequirementPatch>,
) -> Result<Json<Value>, ApiError> {
    let updated = state.db.update_requirement(
        principal.team_id,
        id,
        &RequirementUpdate {
            title: patch.title,
            description: patch.description,
            status: patch.status,
            priority: patch.priority,
            project_id: None,
        },
    )?;
    Ok(Json(json!({ "requirement": updated })))
}

pub async fn delete_requirement(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.db.delete_requirement(principal.team_id, id)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct DeliverRequest {
    pub to_team_id: i64,
}

pub async fn deliver_requirement(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(request): Json<DeliverRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.to_team_id == principal.team_id {
        return Err(ApiError::Validation(
            "cannot deliver a requirement to your own team".to_string(),
        ));
    }
    let delivered_id = state
        .db
        .deliver_requirement(principal.team_id, id, request.to_team_id)?;
    Ok(Json(json!({ "delivered_id": delivered_id })))
}

#[derive(Debug, Deserialize)]
pub struct DeliveryDecision {
    pub accept: bool,
}

pub async fn resolve_delivery(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(decision): Json<DeliveryDecision>,
) -> Result<Json<Value>, ApiError> {
    let resolved = state
        .db
        .resolve_delivery(principal.team_id, id, decision.accept)?;
    Ok(Json(json!({ "requirement": resolved })))
}
