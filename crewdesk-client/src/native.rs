//! Native provider: OpenAI-compatible chat completions over HTTP.

use async_trait::async_trait;
use crewdesk_core::provider::{
    Completion, CompletionRequest, ModelProvider, ProviderCaps, ProviderError, Usage,
};
use crewdesk_core::types::{ChatMessage, ChatRole, ToolCall};
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER: &str = "native";

/// Remote chat-completion API client.
pub struct NativeProvider {
    api_key: Option<String>,
    base_url: String,
    http: reqwest::Client,
}

impl NativeProvider {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Map a chat message to the wire shape.
    fn message_to_wire(message: &ChatMessage) -> Value {
        match message.role {
            ChatRole::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.content,
            }),
            ChatRole::Assistant => {
                let mut wire = json!({
                    "role": "assistant",
                    "content": message.content,
                });
                if !message.tool_calls.is_empty() {
                    wire["tool_calls"] = Value::Array(
                        message
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {"name": tc.name, "arguments": tc.args_json},
                                })
                            })
                            .collect(),
                    );
                }
                wire
            }
            role => json!({"role": role.as_str(), "content": message.content}),
        }
    }

    fn build_body(request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(Self::message_to_wire).collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl ModelProvider for NativeProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps::FULL
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = Self::build_body(&request);
        let url = format!("{}/chat/completions", self.base_url);

        let mut http_request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await.map_err(|e| ProviderError::Request {
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

        let wire: WireResponse = response.json().await.map_err(|e| ProviderError::Protocol {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
        let choice = wire.choices.into_iter().next().ok_or(ProviderError::Protocol {
            provider: PROVIDER,
            message: "response had no choices".to_string(),
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        Ok(Completion {
            assistant_text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: wire.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            provider_events: Vec::new(),
            remote_session_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewdesk_core::provider::ToolSchema;

    fn request(messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".to_string(),
            messages,
            tools: vec![ToolSchema {
                name: "fs_read".to_string(),
                description: "read".to_string(),
                parameters: json!({"type": "object"}),
            }],
            unsandboxed: false,
            workspace: None,
            remote_session_id: None,
        }
    }

    #[test]
    fn test_body_maps_roles_and_tools() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::assistant_with_calls(
                "",
                vec![ToolCall::new("tc_1", "fs_read", r#"{"path":"a"}"#)],
            ),
            ChatMessage::tool("tc_1", "contents"),
        ];
        let body = NativeProvider::build_body(&request(messages));

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["name"],
            "fs_read"
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "tc_1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "fs_read");
    }

    #[test]
    fn test_wire_response_parsing() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "shell_run", "arguments": "{\"command\":\"ls\"}"},
                    }],
                },
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3},
        });
        let wire: WireResponse = serde_json::from_value(raw).unwrap();
        let choice = &wire.choices[0];
        assert!(choice.message.content.is_none());
        assert_eq!(choice.message.tool_calls[0].function.name, "shell_run");
        assert_eq!(wire.usage.as_ref().unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_capabilities_full() {
        let provider = NativeProvider::new(None, "https://api.openai.com/v1");
        assert!(provider.capabilities().generate_docs);
        assert!(provider.capabilities().read_attachments);
        assert!(!provider.capabilities().run_unsandboxed);
    }
}
