//! Mock provider for tests and offline defaults.

use async_trait::async_trait;
use crewdesk_core::provider::{
    Completion, CompletionRequest, ModelProvider, ProviderCaps, ProviderError,
};
use crewdesk_core::types::ChatRole;

/// Returns a fixed assistant text and never calls tools.
pub struct MockProvider {
    reply: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self { reply: None }
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps::FULL
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let text = match &self.reply {
            Some(reply) => reply.clone(),
            None => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == ChatRole::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                format!("[mock] {last_user}")
            }
        };
        Ok(Completion {
            assistant_text: text,
            ..Completion::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewdesk_core::types::ChatMessage;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let provider = MockProvider::new();
        let completion = provider
            .complete(CompletionRequest {
                model: "m".to_string(),
                messages: vec![ChatMessage::user("ping")],
                tools: vec![],
                unsandboxed: false,
                workspace: None,
                remote_session_id: None,
            })
            .await
            .unwrap();
        assert_eq!(completion.assistant_text, "[mock] ping");
        assert!(completion.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_mock_fixed_reply() {
        let provider = MockProvider::with_reply("done");
        let completion = provider
            .complete(CompletionRequest {
                model: "m".to_string(),
                messages: vec![],
                tools: vec![],
                unsandboxed: false,
                workspace: None,
                remote_session_id: None,
            })
            .await
            .unwrap();
        assert_eq!(completion.assistant_text, "done");
    }
}
