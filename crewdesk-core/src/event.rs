//! The structured event trace.
//!
//! Every turn emits an ordered list of tagged events. The same
//! representation is buffered into the chat response, attached to the
//! terminal assistant message as `events_json`, and framed as SSE in
//! streaming mode.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::policy::{CapabilitySet, SecurityPreset};

/// Events emitted during one turn, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ToolEvent {
    /// Derived capability profile; always the first event of a turn.
    SecurityProfile {
        preset: SecurityPreset,
        requested: CapabilitySet,
        effective: CapabilitySet,
    },

    /// The selected provider could not serve part of the request; this
    /// turn runs on the fallback provider instead.
    ProviderFallback {
        from: String,
        to: String,
        requested: Vec<String>,
    },

    /// Provider call is about to start.
    ProviderStart { provider: String, model: String },

    /// The model requested a tool call.
    ToolCall { tool: String, args: Value },

    /// A tool finished; `result` is either the tool's JSON output or an
    /// `{"error": "..."}` object. Tool failures stay inside the event
    /// stream - they never abort the turn.
    ToolResult { tool: String, result: Value },

    /// The context budgeter dropped old messages.
    ContextTrim { dropped: usize, max_chars: usize },

    /// Final assistant text for this turn.
    AssistantMessage { content: String },

    /// An artifact produced outside the tool path (e.g. staged for a
    /// subprocess provider).
    TaskArtifact { path: String, task_id: String },

    /// A provider-side permission request was auto-handled.
    Permission {
        tool: String,
        decision: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },

    /// Provider finished; wall-clock for the whole turn.
    ProviderDone { elapsed_ms: u64 },

    /// Turn-level error. Tool-level failures use `ToolResult` instead.
    Error { message: String },
}

impl ToolEvent {
    /// A `tool_result` carrying a structured error payload.
    pub fn tool_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolResult {
            tool: tool.into(),
            result: json!({ "error": message.into() }),
        }
    }
}

/// Canonical serialized event kind, used as the SSE event name.
pub fn event_type(event: &ToolEvent) -> &'static str {
    match event {
        ToolEvent::SecurityProfile { .. } => "security_profile",
        ToolEvent::ProviderFallback { .. } => "provider_fallback",
        ToolEvent::ProviderStart { .. } => "provider_start",
        ToolEvent::ToolCall { .. } => "tool_call",
        ToolEvent::ToolResult { .. } => "tool_result",
        ToolEvent::ContextTrim { .. } => "context_trim",
        ToolEvent::AssistantMessage { .. } => "assistant_message",
        ToolEvent::TaskArtifact { .. } => "task_artifact",
        ToolEvent::Permission { .. } => "permission",
        ToolEvent::ProviderDone { .. } => "provider_done",
        ToolEvent::Error { .. } => "error",
    }
}
