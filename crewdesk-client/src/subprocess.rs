//! Local CLI providers: `codex`, `pi`, `nanobot`.
//!
//! These run the agent themselves - the binary gets a composed prompt, the
//! workspace as CWD, and streams JSONL events on stdout. We parse the
//! stream into provider events plus the final assistant text. They declare
//! no docs/attachment capability, so those requests fall back to native.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use crewdesk_core::event::ToolEvent;
use crewdesk_core::provider::{
    Completion, CompletionRequest, ModelProvider, ProviderCaps, ProviderError,
};
use crewdesk_core::types::{ChatMessage, ChatRole};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

/// Which CLI this provider drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliFlavor {
    Codex,
    Pi,
    Nanobot,
}

impl CliFlavor {
    fn provider_name(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Pi => "pi",
            Self::Nanobot => "nanobot",
        }
    }
}

/// Provider that spawns a local CLI per turn.
pub struct SubprocessProvider {
    flavor: CliFlavor,
    command: String,
    timeout: Duration,
}

impl SubprocessProvider {
    pub fn new(flavor: CliFlavor, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            flavor,
            command: command.into(),
            timeout,
        }
    }

    /// Flatten the conversation into one prompt: system blocks first, then
    /// a compact history transcript, then the pending user input.
    fn build_prompt(messages: &[ChatMessage]) -> String {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut history: Vec<String> = Vec::new();
        for message in messages {
            match message.role {
                ChatRole::System => system_parts.push(&message.content),
                ChatRole::User => history.push(format!("User: {}", message.content)),
                ChatRole::Assistant if !message.content.is_empty() => {
                    history.push(format!("Assistant: {}", message.content));
                }
                _ => {}
            }
        }

        let mut prompt = String::new();
        if !system_parts.is_empty() {
            prompt.push_str(&system_parts.join("\n\n"));
            prompt.push_str("\n\n");
        }
        if history.len() > 1 {
            prompt.push_str("Conversation so far:\n");
            for line in &history[..history.len() - 1] {
                prompt.push_str(line);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        if let Some(last) = history.last() {
            prompt.push_str(last.trim_start_matches("User: "));
        }
        prompt
    }

    fn build_args(&self, request: &CompletionRequest) -> Vec<String> {
        match self.flavor {
            CliFlavor::Codex => {
                let mut args = vec!["exec".to_string()];
                if request.unsandboxed {
                    args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
                } else {
                    args.extend([
                        "--sandbox".to_string(),
                        "workspace-write".to_string(),
                        "--full-auto".to_string(),
                    ]);
                }
                args.extend([
                    "--json".to_string(),
                    "--skip-git-repo-check".to_string(),
                    "--color".to_string(),
                    "never".to_string(),
                ]);
                if !request.model.is_empty() {
                    args.extend(["--model".to_string(), request.model.clone()]);
                }
                args
            }
            CliFlavor::Pi => {
                let mut args = vec!["run".to_string(), "--json".to_string()];
                if !request.model.is_empty() {
                    args.extend(["--model".to_string(), request.model.clone()]);
                }
                args
            }
            CliFlavor::Nanobot => vec!["run".to_string(), "--quiet".to_string()],
        }
    }

    /// Extract assistant text from one JSONL event, across the shapes the
    /// CLIs emit.
    fn extract_text(line: &Value) -> Option<String> {
        if let Some(msg) = line.get("msg") {
            if msg.get("type").and_then(Value::as_str) == Some("agent_message") {
                return msg
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
        if let Some(item) = line.get("item") {
            if item.get("type").and_then(Value::as_str) == Some("agent_message") {
                return item.get("text").and_then(Value::as_str).map(str::to_string);
            }
        }
        if line.get("type").and_then(Value::as_str) == Some("text") {
            return line.get("text").and_then(Value::as_str).map(str::to_string);
        }
        None
    }

    /// Map interesting JSONL events into the turn trace.
    fn extract_event(line: &Value) -> Option<ToolEvent> {
        let line_type = line
            .get("type")
            .or_else(|| line.get("msg").and_then(|m| m.get("type")))
            .and_then(Value::as_str)?;
        match line_type {
            "permission_request" | "approval_request" => Some(ToolEvent::Permission {
                tool: line
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                decision: "auto-approved".to_string(),
                detail: Some(line.clone()),
            }),
            "artifact" => Some(ToolEvent::TaskArtifact {
                path: line
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                task_id: line
                    .get("task_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl ModelProvider for SubprocessProvider {
    fn name(&self) -> &'static str {
        self.flavor.provider_name()
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps {
            generate_docs: false,
            read_attachments: false,
            run_unsandboxed: self.flavor == CliFlavor::Codex,
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let provider = self.name();
        let prompt = Self::build_prompt(&request.messages);
        let args = self.build_args(&request);

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .arg(&prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(workspace) = &request.workspace {
            cmd.current_dir(workspace);
        }

        debug!(provider, command = %self.command, "spawning CLI provider");
        let child = cmd.spawn().map_err(|e| ProviderError::Spawn {
            provider,
            message: e.to_string(),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout {
                provider,
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ProviderError::Request {
                provider,
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut assistant_text = String::new();
        let mut provider_events = Vec::new();
        let mut saw_jsonl = false;

        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            saw_jsonl = true;
            if let Some(text) = Self::extract_text(&value) {
                assistant_text = text;
            }
            if let Some(event) = Self::extract_event(&value) {
                provider_events.push(event);
            }
        }

        if !saw_jsonl {
            assistant_text = stdout.trim().to_string();
        }

        if !output.status.success() && assistant_text.is_empty() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(600)
                .collect();
            warn!(provider, ?args, "CLI provider failed");
            return Err(ProviderError::Request {
                provider,
                message: format!("exit {:?}: {stderr}", output.status.code()),
            });
        }

        Ok(Completion {
            assistant_text,
            tool_calls: Vec::new(),
            usage: None,
            provider_events,
            remote_session_id: None,
        })
    }
}
