//! The agent loop.
//!
//! Drives assistant↔tool rounds against a [`ModelProvider`] until the model
//! answers without tool calls or `max_steps` is reached. Tool failures stay
//! inside the event stream as `tool_result` errors; provider failures abort
//! the turn. Events for a single turn are emitted in a strict total order.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::budget::{trim_messages, ContextLimits};
use crate::error::{AgentError, ToolError};
use crate::event::ToolEvent;
use crate::policy::SecurityProfile;
use crate::provider::{CompletionRequest, ModelProvider, ToolSchema};
use crate::types::{AttachmentRef, ChatMessage};

/// Dispatch surface the loop sees: a tool catalog plus a total dispatch
/// function over it. Implemented by `crewdesk-tools`.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Provider-facing schemas for every tool callable this turn.
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Validate and execute one call. Raw argument JSON goes in; only the
    /// dispatcher parses it.
    async fn dispatch(&self, name: &str, args_json: &str) -> Result<Value, ToolError>;
}

/// Collects the turn's events and optionally forwards them to a stream.
///
/// The buffer always fills (persistence needs the trace either way); the
/// channel is only present in streaming mode. A lagging stream consumer
/// never loses persisted events.
#[derive(Clone)]
pub struct EventSink {
    buf: std::sync::Arc<std::sync::Mutex<Vec<ToolEvent>>>,
    tx: Option<mpsc::Sender<ToolEvent>>,
}

impl EventSink {
    pub fn buffered() -> Self {
        Self {
            buf: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
            tx: None,
        }
    }

    pub fn streaming(tx: mpsc::Sender<ToolEvent>) -> Self {
        Self {
            tx: Some(tx),
            ..Self::buffered()
        }
    }

    pub async fn emit(&self, event: ToolEvent) {
        if let Ok(mut buf) = self.buf.lock() {
            buf.push(event.clone());
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }

    /// Snapshot of everything emitted so far, in order.
    pub fn events(&self) -> Vec<ToolEvent> {
        self.buf.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub assistant_text: String,
    /// The full message list after the turn (system prompt included as
    /// passed in; persistence filters it out).
    pub messages: Vec<ChatMessage>,
    /// Only the messages this turn appended, user message first - exactly
    /// what persistence writes. Independent of context trimming.
    pub turn_messages: Vec<ChatMessage>,
    /// Latest sidecar session handle reported by the provider.
    pub remote_session_id: Option<String>,
}

/// Truncate a tool result for the model, keeping a trailing marker.
/// A string of exactly `max_chars` passes through untouched.
fn truncate_tool_output(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(14);
    let cut: String = text.chars().take(keep).collect();
    format!("{cut}\n…(truncated)")
}

fn stringify_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

/// Short error payload for `tool_result` events and `tool` messages.
fn tool_error_message(err: &ToolError) -> String {
    match err {
        ToolError::Disabled { .. } => "disabled".to_string(),
        other => other.to_string(),
    }
}

/// One configured turn of the agent loop.
pub struct AgentRun<'a> {
    pub provider: &'a dyn ModelProvider,
    pub model: String,
    pub tools: &'a dyn ToolDispatcher,
    pub profile: SecurityProfile,
    /// Set when the requested provider was bypassed for this turn:
    /// `(requested_provider, features)`.
    pub fallback_from: Option<(String, Vec<String>)>,
    pub max_steps: u32,
    pub context: ContextLimits,
    pub max_tool_output_chars: usize,
    pub provider_timeout: Duration,
    /// Effective no-sandbox bit, forwarded to providers that honor it.
    pub unsandboxed: bool,
    /// Workspace root forwarded to locally executing providers.
    pub workspace: Option<std::path::PathBuf>,
    /// Sidecar session handle from the previous turn, if any.
    pub remote_session_id: Option<String>,
    pub cancel: CancellationToken,
}

impl AgentRun<'_> {
    /// Run the loop to completion.
    ///
    /// `messages` is the budgeted context including the fresh system
    /// prompt; the user message is appended here so the outcome's message
    /// list is exactly what persistence should append (minus system).
    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
        user_input: &str,
        attachments: Vec<AttachmentRef>,
        events: &EventSink,
    ) -> Result<TurnOutcome, AgentError> {
        let started = Instant::now();
        let mut remote_session_id = self.remote_session_id.clone();
        let mut appended: Vec<ChatMessage> = Vec::new();

        let user_message = ChatMessage::user_with_attachments(user_input, attachments);
        appended.push(user_message.clone());
        messages.push(user_message);

        events
            .emit(ToolEvent::SecurityProfile {
                preset: self.profile.preset,
                requested: self.profile.requested,
                effective: self.profile.effective,
            })
            .await;
        if let Some((from, requested)) = &self.fallback_from {
            events
                .emit(ToolEvent::ProviderFallback {
                    from: from.clone(),
                    to: self.provider.name().to_string(),
                    requested: requested.clone(),
                })
                .await;
        }
        events
            .emit(ToolEvent::ProviderStart {
                provider: self.provider.name().to_string(),
                model: self.model.clone(),
            })
            .await;

        for _step in 0..self.max_steps {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            if self.context.max_messages > 0 || self.context.max_chars > 0 {
                let (trimmed, report) = trim_messages(std::mem::take(&mut messages), self.context);
                messages = trimmed;
                if report.dropped > 0 {
                    events
                        .emit(ToolEvent::ContextTrim {
                            dropped: report.dropped,
                            max_chars: self.context.max_chars,
                        })
                        .await;
                }
            }

            let request = CompletionRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: self.tools.schemas(),
                unsandboxed: self.unsandboxed,
                workspace: self.workspace.clone(),
                remote_session_id: remote_session_id.clone(),
            };

            let completion = tokio::select! {
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = tokio::time::timeout(self.provider_timeout, self.provider.complete(request)) => {
                    match outcome {
                        Err(_) => {
                            events
                                .emit(ToolEvent::Error { message: "provider timeout".to_string() })
                                .await;
                            return Err(AgentError::ProviderTimeout);
                        }
                        Ok(Err(err)) => {
                            let message = err.to_string();
                            events.emit(ToolEvent::Error { message: message.clone() }).await;
                            return Err(AgentError::ProviderFailure(message));
                        }
                        Ok(Ok(completion)) => completion,
                    }
                }
            };

            if completion.remote_session_id.is_some() {
                remote_session_id = completion.remote_session_id.clone();
            }

            for event in completion.provider_events {
                events.emit(event).await;
            }

            if !completion.tool_calls.is_empty() {
                let round_open = ChatMessage::assistant_with_calls(
                    completion.assistant_text.clone(),
                    completion.tool_calls.clone(),
                );
                appended.push(round_open.clone());
                messages.push(round_open);

                for call in &completion.tool_calls {
                    let args_value: Value = serde_json::from_str(&call.args_json)
                        .unwrap_or_else(|_| Value::String(call.args_json.clone()));
                    events
                        .emit(ToolEvent::ToolCall {
                            tool: call.name.clone(),
                            args: args_value,
                        })
                        .await;

                    let outcome = tokio::select! {
                        _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                        outcome = self.tools.dispatch(&call.name, &call.args_json) => outcome,
                    };

                    match outcome {
                        Ok(value) => {
                            events
                                .emit(ToolEvent::ToolResult {
                                    tool: call.name.clone(),
                                    result: value.clone(),
                                })
                                .await;
                            let content = truncate_tool_output(
                                &stringify_result(&value),
                                self.max_tool_output_chars,
                            );
                            let tool_message = ChatMessage::tool(&call.id, content);
                            appended.push(tool_message.clone());
                            messages.push(tool_message);
                        }
                        Err(err) => {
                            let message = tool_error_message(&err);
                            tracing::debug!(tool = %call.name, error = %err, "tool call failed");
                            events
                                .emit(ToolEvent::tool_error(call.name.clone(), message.clone()))
                                .await;
                            let tool_message = ChatMessage::tool(&call.id, message);
                            appended.push(tool_message.clone());
                            messages.push(tool_message);
                        }
                    }
                }
                continue;
            }

            let assistant_text = completion.assistant_text.trim().to_string();
            appended.push(ChatMessage::assistant(assistant_text.clone()));
            messages.push(ChatMessage::assistant(assistant_text.clone()));
            events
                .emit(ToolEvent::AssistantMessage {
                    content: assistant_text.clone(),
                })
                .await;
            events
                .emit(ToolEvent::ProviderDone {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
                .await;
            return Ok(TurnOutcome {
                assistant_text,
                messages,
                turn_messages: appended,
                remote_session_id,
            });
        }

        let stop_message = format!("Stopped after max_steps={}.", self.max_steps);
        events
            .emit(ToolEvent::Error {
                message: stop_message.clone(),
            })
            .await;
        appended.push(ChatMessage::assistant(stop_message.clone()));
        messages.push(ChatMessage::assistant(stop_message.clone()));
        Ok(TurnOutcome {
            assistant_text: stop_message,
            messages,
            turn_messages: appended,
            remote_session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_type;
    use crate::policy::{CapabilitySet, SecurityPreset};
    use crate::provider::{Completion, ProviderCaps, ProviderError};
    use crate::types::ToolCall;
    use serde_json::json;
    use std::sync::Mutex;

    /// Provider that replays a scripted sequence of completions.
    struct ScriptedProvider {
        script: Mutex<Vec<Completion>>,
    }

    impl ScriptedProvider {
        fn new(mut completions: Vec<Completion>) -> Self {
            completions.reverse();
            Self {
                script: Mutex::new(completions),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn capabilities(&self) -> ProviderCaps {
            ProviderCaps::FULL
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or(ProviderError::Protocol {
                    provider: "mock",
                    message: "script exhausted".to_string(),
                })
        }
    }

    struct EchoTools;

    #[async_trait]
    impl ToolDispatcher for EchoTools {
        fn schemas(&self) -> Vec<ToolSchema> {
            vec![ToolSchema {
                name: "echo".to_string(),
                description: "echo args".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }]
        }

        async fn dispatch(&self, name: &str, args_json: &str) -> Result<Value, ToolError> {
            match name {
                "echo" => Ok(json!({ "echo": args_json })),
                "fs_write" => Err(ToolError::disabled("fs_write")),
                other => Err(ToolError::not_found(other)),
            }
        }
    }

    fn run_config<'a>(
        provider: &'a ScriptedProvider,
        tools: &'a EchoTools,
    ) -> AgentRun<'a> {
        AgentRun {
            provider,
            model: "test-model".to_string(),
            tools,
            profile: SecurityProfile {
                preset: SecurityPreset::Safe,
                requested: CapabilitySet::NONE,
                effective: CapabilitySet::NONE,
            },
            fallback_from: None,
            max_steps: 5,
            context: ContextLimits {
                max_messages: 0,
                max_chars: 0,
            },
            max_tool_output_chars: 10_000,
            provider_timeout: Duration::from_secs(5),
            unsandboxed: false,
            workspace: None,
            remote_session_id: None,
            cancel: CancellationToken::new(),
        }
    }

    fn text_completion(text: &str) -> Completion {
        Completion {
            assistant_text: text.to_string(),
            ..Completion::default()
        }
    }

    fn call_completion(name: &str, args: &str) -> Completion {
        Completion {
            tool_calls: vec![ToolCall::new("tc_1", name, args)],
            ..Completion::default()
        }
    }

    // ==================== Happy path ====================

    #[tokio::test]
    async fn test_plain_answer_emits_expected_events() {
        let provider = ScriptedProvider::new(vec![text_completion("hello")]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        let outcome = run_config(&provider, &tools)
            .run(vec![ChatMessage::system("sys")], "hi", vec![], &sink)
            .await
            .unwrap();

        assert_eq!(outcome.assistant_text, "hello");
        let kinds: Vec<&str> = sink.events().iter().map(event_type).collect();
        assert_eq!(
            kinds,
            vec![
                "security_profile",
                "provider_start",
                "assistant_message",
                "provider_done"
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let provider = ScriptedProvider::new(vec![
            call_completion("echo", r#"{"x":1}"#),
            text_completion("done"),
        ]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        let outcome = run_config(&provider, &tools)
            .run(vec![ChatMessage::system("sys")], "go", vec![], &sink)
            .await
            .unwrap();

        assert_eq!(outcome.assistant_text, "done");
        let kinds: Vec<&str> = sink.events().iter().map(event_type).collect();
        assert_eq!(
            kinds,
            vec![
                "security_profile",
                "provider_start",
                "tool_call",
                "tool_result",
                "assistant_message",
                "provider_done"
            ]
        );
        // Tool message is in the outcome and answers the call id.
        let tool_msg = outcome
            .messages
            .iter()
            .find(|m| m.role == crate::types::ChatRole::Tool)
            .unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("tc_1"));
        // turn_messages is exactly user + round-open + tool + final answer.
        assert_eq!(outcome.turn_messages.len(), 4);
        assert_eq!(outcome.turn_messages[0].role, crate::types::ChatRole::User);
    }

    // ==================== Tool failures stay in-stream ====================

    #[tokio::test]
    async fn test_unknown_tool_reports_error_and_continues() {
        let provider = ScriptedProvider::new(vec![
            call_completion("no_such_tool", "{}"),
            text_completion("recovered"),
        ]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        let outcome = run_config(&provider, &tools)
            .run(vec![], "go", vec![], &sink)
            .await
            .unwrap();

        assert_eq!(outcome.assistant_text, "recovered");
        let error_result = sink
            .events()
            .into_iter()
            .find_map(|e| match e {
                ToolEvent::ToolResult { result, .. } => result.get("error").cloned(),
                _ => None,
            })
            .unwrap();
        assert!(error_result.as_str().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_disabled_tool_reports_disabled() {
        let provider = ScriptedProvider::new(vec![
            call_completion("fs_write", r#"{"path":"a"}"#),
            text_completion("ok"),
        ]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        run_config(&provider, &tools)
            .run(vec![], "go", vec![], &sink)
            .await
            .unwrap();

        let has_disabled = sink.events().iter().any(|e| {
            matches!(e, ToolEvent::ToolResult { result, .. } if result["error"] == "disabled")
        });
        assert!(has_disabled);
    }

    // ==================== Limits ====================

    #[tokio::test]
    async fn test_max_steps_synthesizes_stop_message() {
        // Provider always asks for another tool round.
        let provider = ScriptedProvider::new(vec![
            call_completion("echo", "{}"),
            call_completion("echo", "{}"),
            call_completion("echo", "{}"),
        ]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        let mut config = run_config(&provider, &tools);
        config.max_steps = 3;
        let outcome = config.run(vec![], "go", vec![], &sink).await.unwrap();

        assert!(outcome.assistant_text.contains("max_steps=3"));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, ToolEvent::Error { message } if message.contains("max_steps"))));
    }

    #[tokio::test]
    async fn test_provider_error_aborts_turn() {
        let provider = ScriptedProvider::new(vec![]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        let err = run_config(&provider, &tools)
            .run(vec![], "go", vec![], &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProviderFailure(_)));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, ToolEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_before_step() {
        let provider = ScriptedProvider::new(vec![text_completion("never")]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        let config = run_config(&provider, &tools);
        config.cancel.cancel();
        let err = config.run(vec![], "go", vec![], &sink).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_fallback_event_emitted_before_provider_start() {
        let provider = ScriptedProvider::new(vec![text_completion("ok")]);
        let tools = EchoTools;
        let sink = EventSink::buffered();

        let mut config = run_config(&provider, &tools);
        config.fallback_from = Some(("opencode".to_string(), vec!["docs".to_string()]));
        config.run(vec![], "make a deck", vec![], &sink).await.unwrap();

        let kinds: Vec<&str> = sink.events().iter().map(event_type).collect();
        assert_eq!(kinds[0], "security_profile");
        assert_eq!(kinds[1], "provider_fallback");
        assert_eq!(kinds[2], "provider_start");
    }

    // ==================== Truncation boundary ====================

    #[test]
    fn test_truncation_boundary_exact_length_untouched() {
        let exact = "a".repeat(100);
        assert_eq!(truncate_tool_output(&exact, 100), exact);

        let over = "a".repeat(101);
        let cut = truncate_tool_output(&over, 100);
        assert!(cut.ends_with("…(truncated)"));
        assert!(cut.chars().count() <= 100);
    }

    #[test]
    fn test_stringify_string_results_verbatim() {
        assert_eq!(stringify_result(&Value::String("plain".into())), "plain");
        let obj = json!({"k": 1});
        assert!(stringify_result(&obj).contains("\"k\""));
    }
}
