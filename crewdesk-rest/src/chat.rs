//! Chat entry: the request lifecycle.
//!
//! Authorize → resolve workspace root → derive capability → fetch or
//! rehydrate the session → rebuild the system prompt → run the loop →
//! commit persistence → respond. The turn body runs in a spawned task
//! with a cancellation token armed by a drop guard, so a client
//! disconnect cancels the loop at the next step boundary while the user
//! message still commits.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use crewdesk_core::agent::{AgentRun, EventSink};
use crewdesk_core::budget::ContextLimits;
use crewdesk_core::event::{event_type, ToolEvent};
use crewdesk_core::policy::{
    dangerous_explicitly_denied, derive_profile, RequestToggles, SecurityPreset,
};
use crewdesk_core::prompt::PromptInputs;
use crewdesk_core::provider::ModelProvider;
use crewdesk_core::sandbox::WorkspaceSandbox;
use crewdesk_core::session::SessionState;
use crewdesk_core::session_store::SessionCacheError;
use crewdesk_core::types::{AttachmentRef, ChatMessage, ChatRole, SessionId};
use crewdesk_client::features::{detect_features, unserved_features};
use crewdesk_store::sessions::{SessionRow, TurnCommit};
use crewdesk_tools::context::{ToolCtx, ToolLimits};
use crewdesk_tools::registry::RegistryDispatcher;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::artifacts_bridge::StoreArtifactRegistrar;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub security_preset: Option<String>,
    #[serde(default)]
    pub enable_shell: Option<bool>,
    #[serde(default)]
    pub enable_write: Option<bool>,
    #[serde(default)]
    pub enable_browser: Option<bool>,
    #[serde(default)]
    pub enable_dangerous: Option<bool>,
    #[serde(default)]
    pub show_reasoning: Option<bool>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

fn default_role() -> String {
    "general".to_string()
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub assistant: String,
    pub events: Vec<ToolEvent>,
}

/// Lexical containment check against the configured allow-list.
fn under_allowlist(path: &Path, allowlist: &[PathBuf]) -> bool {
    allowlist
        .iter()
        .any(|root| path == root || path.starts_with(root))
}

/// Pick the workspace root: explicit project → team workspace → server
/// default.
pub(crate) fn resolve_workspace_root(
    state: &AppState,
    principal: &Principal,
    project_id: Option<i64>,
) -> Result<(PathBuf, Option<i64>), ApiError> {
    if let Some(project_id) = project_id {
        let project = state
            .db
            .get_project(principal.team_id, project_id)?
            .ok_or_else(|| ApiError::NotFound("project not found".to_string()))?;
        if !project.enabled {
            return Err(ApiError::Validation("project is disabled".to_string()));
        }
        let path = PathBuf::from(&project.path);
        if !under_allowlist(&path, &state.settings.projects_root_allowlist) {
            return Err(ApiError::Validation(
                "project path is outside the allowed roots".to_string(),
            ));
        }
        return Ok((path, Some(project_id)));
    }

    if let Some(team_path) = state.db.team_workspace_path(principal.team_id)? {
        let path = PathBuf::from(&team_path);
        if !under_allowlist(&path, &state.settings.projects_root_allowlist) {
            return Err(ApiError::Validation(
                "team workspace path is outside the allowed roots".to_string(),
            ));
        }
        return Ok((path, None));
    }

    Ok((state.settings.workspace_default.clone(), None))
}

fn resolve_provider(
    state: &AppState,
    requested: Option<&str>,
) -> Result<Arc<dyn ModelProvider>, ApiError> {
    if let Some(provider) = &state.provider_override {
        return Ok(provider.clone());
    }
    Ok(state.providers.resolve(requested)?)
}

fn native_provider(state: &AppState) -> Arc<dyn ModelProvider> {
    if let Some(provider) = &state.native_override {
        return provider.clone();
    }
    if let Some(provider) = &state.provider_override {
        return provider.clone();
    }
    state.providers.native()
}

/// File ids surfaced by tool results this turn.
fn extract_output_file_ids(events: &[ToolEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ToolEvent::ToolResult { result, .. } => result
                .get("file_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

/// The full turn, from authorization to persistence.
pub async fn run_chat_turn(
    state: AppState,
    principal: Principal,
    request: ChatRequest,
    sink: EventSink,
    cancel: CancellationToken,
) -> Result<ChatResponse, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::Validation("message is empty".to_string()));
    }

    let preset = SecurityPreset::parse(request.security_preset.as_deref());
    let toggles = RequestToggles {
        shell: request.enable_shell,
        write: request.enable_write,
        browser: request.enable_browser,
        dangerous: request.enable_dangerous,
    };

    // The only hard rejection: the request explicitly asked for the
    // no-sandbox bit and the server ceiling forbids it.
    if dangerous_explicitly_denied(state.settings.ceiling, preset, toggles) {
        return Err(ApiError::PermissionDenied(
            "no-sandbox execution is not allowed on this server".to_string(),
        ));
    }

    let (workspace_root, project_id) =
        resolve_workspace_root(&state, &principal, request.project_id)?;
    let _ = tokio::fs::create_dir_all(&workspace_root).await;

    // Provider selection with capability-driven fallback, decided once.
    let mut provider = resolve_provider(&state, request.provider.as_deref())?;
    let requested_provider = provider.name().to_string();
    let features = detect_features(&request.message, !request.attachments.is_empty());
    let unserved = unserved_features(provider.capabilities(), &features);
    let fallback_from = if unserved.is_empty() {
        None
    } else {
        let feature_names = unserved.iter().map(|f| f.as_str().to_string()).collect();
        provider = native_provider(&state);
        Some((requested_provider.clone(), feature_names))
    };

    let profile = derive_profile(
        state.settings.ceiling,
        preset,
        toggles,
        principal.team_role,
        provider.capabilities(),
    );

    let model = request
        .model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.settings.model_default.clone());

    // Fetch or rehydrate the session; creation races resolve by retry.
    let session_id = request
        .session_id
        .clone()
        .map(SessionId::from)
        .unwrap_or_default();
    let slot = match state.sessions.get(&session_id, principal.team_id).await {
        Ok(Some(slot)) => slot,
        Err(SessionCacheError::NotOwned) => {
            return Err(ApiError::NotFound("session not found".to_string()));
        }
        Ok(None) => {
            let mut fresh = SessionState::new(
                session_id.clone(),
                principal.team_id,
                principal.user_id,
                request.role.clone(),
                provider.name(),
                model.clone(),
                workspace_root.clone(),
            );
            if request.session_id.is_some() {
                match state.db.get_session(principal.team_id, session_id.as_str())? {
                    Some(row) => {
                        fresh.messages = state.db.recent_messages(
                            principal.team_id,
                            session_id.as_str(),
                            state.settings.max_session_messages,
                        )?;
                        fresh.remote_session_id = row.remote_session_id;
                    }
                    None => {
                        // A session id that lives under another team is
                        // indistinguishable from a missing one.
                        if state.db.session_exists_anywhere(session_id.as_str())? {
                            return Err(ApiError::NotFound("session not found".to_string()));
                        }
                    }
                }
            }
            state
                .sessions
                .insert(fresh)
                .await
                .map_err(|_| ApiError::NotFound("session not found".to_string()))?
        }
    };

    // Per-session serialization: the slot lock is held from here through
    // the persistence commit.
    let mut session = slot.state.lock().await;
    session.role = request.role.clone();
    session.provider = provider.name().to_string();
    session.model = model.clone();
    session.project_id = project_id;
    session.workspace_root = workspace_root.clone();

    let pre_turn_messages = session.messages.clone();

    let team_skills = state.db.enabled_skill_prompts(principal.team_id)?;
    let system_prompt = state
        .prompts
        .build(&PromptInputs {
            role: &session.role,
            provider: provider.name(),
            model: &model,
            workspace_root: &workspace_root,
            effective: profile.effective,
            team_skills: &team_skills,
            show_reasoning: request.show_reasoning.unwrap_or(false),
        })
        .await;

    let mut context: Vec<ChatMessage> = Vec::with_capacity(session.messages.len() + 1);
    context.push(ChatMessage::system(system_prompt));
    context.extend(session.messages.iter().cloned());

    let tool_ctx = ToolCtx {
        team_id: principal.team_id,
        user_id: principal.user_id,
        session_id: Some(session_id.as_str().to_string()),
        project_id,
        workspace: WorkspaceSandbox::new(&workspace_root),
        effective: profile.effective,
        limits: ToolLimits {
            max_file_read_chars: state.settings.max_file_read_chars,
            max_tool_output_chars: state.settings.max_tool_output_chars,
        },
        artifacts: Arc::new(StoreArtifactRegistrar::new(state.artifacts.clone())),
        renderer: state.renderer.clone(),
        browser: state.browser.clone(),
        cancel: cancel.clone(),
    };
    let dispatcher = RegistryDispatcher::new(state.registry.clone(), tool_ctx);

    let run = AgentRun {
        provider: provider.as_ref(),
        model: model.clone(),
        tools: &dispatcher,
        profile,
        fallback_from,
        max_steps: state.settings.max_steps.max(1),
        context: ContextLimits {
            max_messages: state.settings.max_session_messages,
            max_chars: state.settings.max_context_chars,
        },
        max_tool_output_chars: state.settings.max_tool_output_chars,
        provider_timeout: state.settings.provider_timeout,
        unsandboxed: profile.effective.dangerous,
        workspace: Some(workspace_root.clone()),
        remote_session_id: session.remote_session_id.clone(),
        cancel: cancel.clone(),
    };

    let session_row = SessionRow {
        session_id: session_id.as_str().to_string(),
        team_id: principal.team_id,
        user_id: principal.user_id,
        role: session.role.clone(),
        provider: provider.name().to_string(),
        model: model.clone(),
        project_id,
        title: String::new(),
        remote_session_id: session.remote_session_id.clone(),
        created_at: String::new(),
        updated_at: String::new(),
    };

    let outcome = run
        .run(context, &request.message, request.attachments.clone(), &sink)
        .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            // Aborted turn: only the user message commits; in-flight
            // assistant state is discarded.
            let user_message =
                ChatMessage::user_with_attachments(&request.message, request.attachments.clone());
            let commit = TurnCommit {
                session: &session_row,
                user_message: &user_message,
                turn_messages: &[],
                events_json: None,
                output_file_ids: &[],
            };
            if let Err(commit_err) = state.db.commit_turn(&commit) {
                tracing::warn!(error = %commit_err, "aborted-turn commit failed");
            } else {
                session.messages.push(user_message);
                session.touch();
            }
            return Err(err.into());
        }
    };

    // Update live state from the loop's view (system prompt excluded).
    session.messages = outcome
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .cloned()
        .collect();
    if outcome.remote_session_id.is_some() {
        session.remote_session_id = outcome.remote_session_id.clone();
    }
    session.touch();

    let events = sink.events();
    let events_json = serde_json::to_string(&events).ok();
    let output_file_ids = extract_output_file_ids(&events);

    let (user_message, turn_messages) = outcome
        .turn_messages
        .split_first()
        .map(|(head, tail)| (head.clone(), tail.to_vec()))
        .unwrap_or_else(|| {
            (
                ChatMessage::user_with_attachments(&request.message, request.attachments.clone()),
                Vec::new(),
            )
        });

    let mut session_row = session_row;
    session_row.remote_session_id = session.remote_session_id.clone();

    let commit = TurnCommit {
        session: &session_row,
        user_message: &user_message,
        turn_messages: &turn_messages,
        events_json,
        output_file_ids: &output_file_ids,
    };
    if let Err(err) = state.db.commit_turn(&commit) {
        // All-or-nothing: the in-memory session rolls back with the tx.
        session.messages = pre_turn_messages;
        return Err(err.into());
    }

    // Best-effort snapshot mirror for grep-style history search.
    if let Ok(rows) = state
        .db
        .session_messages(principal.team_id, session_id.as_str())
    {
        let title = state
            .db
            .get_session(principal.team_id, session_id.as_str())
            .ok()
            .flatten()
            .map(|s| s.title)
            .unwrap_or_default();
        if let Err(err) = state
            .snapshots
            .write(principal.team_id, session_id.as_str(), &title, &rows)
            .await
        {
            tracing::debug!(error = %err, "snapshot write failed");
        }
    }

    Ok(ChatResponse {
        session_id: session_id.as_str().to_string(),
        assistant: outcome.assistant_text,
        events,
    })
}

/// `POST /chat` - buffered JSON response.
pub async fn chat_handler(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let sink = EventSink::buffered();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    // The turn runs in its own task so a client disconnect (this handler
    // future dropping) cancels cooperatively instead of tearing mid-step.
    let task = tokio::spawn(run_chat_turn(state, principal, request, sink, cancel));
    let result = task
        .await
        .map_err(|e| ApiError::Internal(format!("turn task failed: {e}")))?;
    let _ = guard.disarm();
    result.map(Json)
}

/// `POST /chat/stream` - the same events framed as SSE, terminated by
/// `event: done`.
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<ToolEvent>(256);
    let sink = EventSink::streaming(tx);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let task = tokio::spawn(run_chat_turn(state, principal, request, sink, cancel));

    struct StreamState {
        rx: mpsc::Receiver<ToolEvent>,
        task: Option<tokio::task::JoinHandle<Result<ChatResponse, ApiError>>>,
        _guard: tokio_util::sync::DropGuard,
        done: bool,
    }

    let stream = futures::stream::unfold(
        StreamState {
            rx,
            task: Some(task),
            _guard: guard,
            done: false,
        },
        |mut s| async move {
            if s.done {
                return None;
            }
            match s.rx.recv().await {
                Some(event) => {
                    let sse = Event::default()
                        .event(event_type(&event))
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().event("error").data("{}"));
                    Some((Ok::<_, Infallible>(sse), s))
                }
                None => {
                    // Sink dropped: the turn is over. Emit the terminal
                    // event with the outcome.
                    let success = match s.task.take() {
                        Some(handle) => matches!(handle.await, Ok(Ok(_))),
                        None => false,
                    };
                    s.done = true;
                    let done = Event::default()
                        .event("done")
                        .data(json!({ "success": success }).to_string());
                    Some((Ok(done), s))
                }
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_output_file_ids() {
        let events = vec![
            ToolEvent::ToolCall {
                tool: "doc_quote_xlsx_create".to_string(),
                args: json!({}),
            },
            ToolEvent::ToolResult {
                tool: "doc_quote_xlsx_create".to_string(),
                result: json!({"file_id": "abc.html", "download_url": "http://x"}),
            },
            ToolEvent::ToolResult {
                tool: "fs_read".to_string(),
                result: json!("just text"),
            },
            ToolEvent::tool_error("fs_write", "disabled"),
        ];
        assert_eq!(extract_output_file_ids(&events), vec!["abc.html".to_string()]);
    }

    #[test]
    fn test_under_allowlist() {
        let allow = vec![PathBuf::from("/srv/projects"), PathBuf::from("/srv/work")];
        assert!(under_allowlist(Path::new("/srv/projects/api"), &allow));
        assert!(under_allowlist(Path::new("/srv/work"), &allow));
        assert!(!under_allowlist(Path::new("/etc"), &allow));
    }
}
