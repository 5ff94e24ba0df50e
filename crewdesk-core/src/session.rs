//! Live session state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::types::{ChatMessage, SessionId};

/// In-memory state for one chat session.
///
/// Durable rows in `chat_sessions`/`chat_messages` outlive this; the cache
/// rehydrates from them after eviction or a restart. System messages are
/// never stored here - the system prompt is re-synthesized every turn.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub team_id: i64,
    pub user_id: i64,
    pub role: String,
    pub provider: String,
    pub model: String,
    pub project_id: Option<i64>,
    pub workspace_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Conversational history (user/assistant/tool only).
    pub messages: Vec<ChatMessage>,
    /// Remote session handle for sidecar providers (e.g. opencode).
    pub remote_session_id: Option<String>,
}

impl SessionState {
    pub fn new(
        session_id: SessionId,
        team_id: i64,
        user_id: i64,
        role: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        workspace_root: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            team_id,
            user_id,
            role: role.into(),
            provider: provider.into(),
            model: model.into(),
            project_id: None,
            workspace_root,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            remote_session_id: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
