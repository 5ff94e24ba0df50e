//! Model provider interface.
//!
//! Every provider - the native HTTP API, local CLI providers, the opencode
//! sidecar, the test mock - presents the same `complete` surface and
//! declares what it can serve. Fallback routing is derived from the
//! declared capabilities, never from the provider's name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ToolEvent;
use crate::types::{ChatMessage, ToolCall};

/// Static capability declaration for a provider variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCaps {
    /// Can drive the document/prototype generator tools.
    pub generate_docs: bool,
    /// Can read previously uploaded attachments by file id.
    pub read_attachments: bool,
    /// Supports the no-sandbox (`dangerous`) execution bit.
    pub run_unsandboxed: bool,
}

impl ProviderCaps {
    /// The native provider serves the full tool surface.
    pub const FULL: ProviderCaps = ProviderCaps {
        generate_docs: true,
        read_attachments: true,
        run_unsandboxed: false,
    };
}

/// JSON-schema descriptor of a callable tool, as shipped to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One provider call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    /// Effective no-sandbox bit; only honored by providers declaring
    /// `run_unsandboxed`.
    pub unsandboxed: bool,
    /// Workspace root for providers that execute locally (CLI providers
    /// run with this as their working directory).
    pub workspace: Option<std::path::PathBuf>,
    /// Sidecar session handle from a previous turn, when the provider
    /// keeps remote state.
    pub remote_session_id: Option<String>,
}

/// Token accounting reported by a provider, when available.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Normalized provider response.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub assistant_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// Provider-side events (subprocess progress, permission decisions)
    /// spliced into the turn's trace.
    pub provider_events: Vec<ToolEvent>,
    /// Updated sidecar session handle, to carry to the next turn.
    pub remote_session_id: Option<String>,
}

/// Errors from a provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider '{provider}' request failed: {message}")]
    Request { provider: &'static str, message: String },

    #[error("provider '{provider}' returned an unexpected payload: {message}")]
    Protocol { provider: &'static str, message: String },

    #[error("provider '{provider}' timed out after {timeout_secs}s")]
    Timeout { provider: &'static str, timeout_secs: u64 },

    #[error("failed to spawn provider '{provider}': {message}")]
    Spawn { provider: &'static str, message: String },

    #[error("provider '{name}' is not enabled")]
    Disabled { name: String },

    #[error("unknown provider: {name}")]
    Unknown { name: String },
}

/// Uniform interface over the model call.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider name as it appears in events and config.
    fn name(&self) -> &'static str;

    /// Static capability declaration.
    fn capabilities(&self) -> ProviderCaps;

    /// Run one model call and normalize the response.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;
}
