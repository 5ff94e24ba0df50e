//! Shared harness for integration tests: a fully wired [`AppState`] over
//! temp directories, seeded teams, and a scripted provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use crewdesk_core::config::Settings;
use crewdesk_core::policy::{CapabilitySet, TeamRole};
use crewdesk_core::provider::{
    Completion, CompletionRequest, ModelProvider, ProviderCaps, ProviderError,
};
use crewdesk_core::types::ToolCall;
use crewdesk_rest::auth::{JwtPrincipalResolver, Principal};
use crewdesk_rest::{router, AppState};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Provider that replays a scripted completion sequence and records every
/// request it saw.
pub struct ScriptedProvider {
    name: &'static str,
    caps: ProviderCaps,
    script: Mutex<VecDeque<Completion>>,
    pub seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, caps: ProviderCaps, script: Vec<Completion>) -> Self {
        Self {
            name,
            caps,
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(text: &str) -> Self {
        Self::new(
            "mock",
            ProviderCaps::FULL,
            vec![text_completion(text)],
        )
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> ProviderCaps {
        self.caps
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.seen.lock().unwrap().push(request);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| text_completion("done")))
    }
}

pub fn text_completion(text: &str) -> Completion {
    Completion {
        assistant_text: text.to_string(),
        ..Completion::default()
    }
}

pub fn call_completion(id: &str, tool: &str, args: &str) -> Completion {
    Completion {
        tool_calls: vec![ToolCall::new(id, tool, args)],
        ..Completion::default()
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub app: Router,
    pub team_a: i64,
    pub team_b: i64,
    pub owner_token: String,
    pub member_token: String,
    pub team_b_token: String,
    _dirs: Vec<TempDir>,
}

impl TestEnv {
    /// Full environment with the given provider override and server
    /// capability ceiling.
    pub fn new(provider: Arc<dyn ModelProvider>, ceiling: CapabilitySet) -> Self {
        std::env::set_var("CREWDESK_JWT_SECRET", TEST_SECRET);

        let data_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();

        let mut settings = Settings::from_env();
        settings.jwt_secret = TEST_SECRET.to_string();
        settings.provider_default = "mock".to_string();
        settings.data_dir = data_dir.path().to_path_buf();
        settings.db_path = data_dir.path().join("crewdesk.db");
        settings.outputs_dir = data_dir.path().join("outputs");
        settings.workspace_default = workspace.path().to_path_buf();
        settings.projects_root_allowlist = vec![workspace.path().to_path_buf()];
        settings.ceiling = ceiling;
        settings.public_base_url = "http://testserver".to_string();
        settings.max_steps = 8;

        let mut state = AppState::new(settings).unwrap();
        state.provider_override = Some(provider);

        let db = state.db.clone();
        let owner = db.create_user("owner@a.example", "Owner").unwrap();
        let member = db.create_user("member@a.example", "Member").unwrap();
        let other = db.create_user("owner@b.example", "Other").unwrap();
        let team_a = db.create_team("alpha").unwrap();
        let team_b = db.create_team("beta").unwrap();
        db.add_membership(owner, team_a, TeamRole::Owner).unwrap();
        db.add_membership(member, team_a, TeamRole::Member).unwrap();
        db.add_membership(other, team_b, TeamRole::Owner).unwrap();

        let resolver = JwtPrincipalResolver::new(TEST_SECRET);
        let mint = |user_id: i64, email: &str, team_id: i64, role: TeamRole| {
            resolver
                .mint(
                    &Principal {
                        user_id,
                        email: email.to_string(),
                        team_id,
                        team_role: role,
                    },
                    3600,
                )
                .unwrap()
        };
        let owner_token = mint(owner, "owner@a.example", team_a, TeamRole::Owner);
        let member_token = mint(member, "member@a.example", team_a, TeamRole::Member);
        let team_b_token = mint(other, "owner@b.example", team_b, TeamRole::Owner);

        let app = router(state.clone());
        Self {
            state,
            app,
            team_a,
            team_b,
            owner_token,
            member_token,
            team_b_token,
            _dirs: vec![data_dir, workspace],
        }
    }

    pub fn workspace_root(&self) -> std::path::PathBuf {
        self.state.settings.workspace_default.clone()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };
        (status, value)
    }

    pub async fn post_chat(&self, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, "/chat", Some(token), Some(body)).await
    }

    /// Raw response for endpoints that stream bytes (downloads).
    pub async fn raw_get(&self, uri: &str) -> (StatusCode, Vec<u8>, Option<String>) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec(), content_type)
    }
}

/// Event objects of a given type from a chat response body.
pub fn events_of_type<'a>(body: &'a Value, event_type: &str) -> Vec<&'a Value> {
    body["events"]
        .as_array()
        .map(|events| {
            events
                .iter()
                .filter(|e| e["type"] == event_type)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}
