//! Opencode sidecar provider: a local HTTP service that runs the agent.

use std::time::Duration;

use async_trait::async_trait;
use crewdesk_core::provider::{
    Completion, CompletionRequest, ModelProvider, ProviderCaps, ProviderError,
};
use crewdesk_core::types::{ChatMessage, ChatRole};
use serde_json::{json, Value};
use tracing::debug;

const PROVIDER: &str = "opencode";

/// HTTP client for the opencode server.
///
/// A remote session is created on first use and its id carried on the chat
/// session, so follow-up turns keep sidecar context.
pub struct OpencodeProvider {
    base_url: String,
    username: String,
    password: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpencodeProvider {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password,
            timeout,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .timeout(self.timeout);
        if let Some(password) = &self.password {
            builder = builder.basic_auth(&self.username, Some(password));
        }
        builder
    }

    async fn ensure_session(&self, existing: Option<&str>) -> Result<String, ProviderError> {
        if let Some(id) = existing {
            return Ok(id.to_string());
        }
        let response = self
            .request(reqwest::Method::POST, "/session")
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
        let value: Value = response.json().await.map_err(|e| ProviderError::Protocol {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ProviderError::Protocol {
                provider: PROVIDER,
                message: "session create response had no id".to_string(),
            })
    }

    /// Latest user input plus system guidance, as message parts.
    fn build_parts(messages: &[ChatMessage]) -> Vec<Value> {
        let mut parts = Vec::new();
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if !system.is_empty() {
            parts.push(json!({"type": "text", "text": system.join("\n\n"), "synthetic": true}));
        }
        if let Some(user) = messages.iter().rev().find(|m| m.role == ChatRole::User) {
            parts.push(json!({"type": "text", "text": user.content}));
        }
        parts
    }

    fn extract_text(value: &Value) -> String {
        let parts = value
            .get("parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out: Vec<String> = Vec::new();
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push(text.to_string());
                }
            }
        }
        out.join("\n").trim().to_string()
    }
}

#[async_trait]
impl ModelProvider for OpencodeProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn capabilities(&self) -> ProviderCaps {
        // Shell/file work happens sidecar-side; docs and attachments do not.
        ProviderCaps {
            generate_docs: false,
            read_attachments: false,
            run_unsandboxed: false,
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let session_id = self
            .ensure_session(request.remote_session_id.as_deref())
            .await?;
        debug!(%session_id, "posting message to opencode");

        let mut body = json!({"parts": Self::build_parts(&request.messages)});
        if !request.model.is_empty() {
            body["model"] = Value::String(request.model.clone());
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/session/{session_id}/message"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let snippet: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(400)
                .collect();
            return Err(ProviderError::Request {
                provider: PROVIDER,
                message: format!("HTTP {status}: {snippet}"),
            });
        }

        let value: Value = response.json().await.map_err(|e| ProviderError::Protocol {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        Ok(Completion {
            assistant_text: Self::extract_text(&value),
            tool_calls: Vec::new(),
            usage: None,
            provider_events: Vec::new(),
            remote_session_id: Some(session_id),
        })
    }
}
