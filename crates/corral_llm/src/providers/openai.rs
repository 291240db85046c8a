//! OpenAI adapter — Chat Completions API.
//!
//! The request/response conversion lives in free functions so the Groq
//! adapter (an OpenAI-compatible endpoint) can reuse it.

use crate::api_types::{
    Capabilities, LlmRequest, LlmResponse, Message, Role, ToolCallRequest, ToolDef,
};
use crate::gateway::{LlmClient, LlmError};
use crate::retry::{with_retry, RetryConfig};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| LlmError::Communication(e.to_string()))?,
            api_key,
            base_url,
            model: model.to_string(),
        })
    }
}

/// Convert neutral messages to the chat-completions format; the system
/// prompt becomes the first message with role "system".
pub(crate) fn build_chat_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::new();
    if let Some(system) = system {
        out.push(json!({"role": "system", "content": system}));
    }
    for m in messages {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        out.push(json!({"role": role, "content": m.content}));
    }
    out
}

pub(crate) fn build_chat_tools(tools: &[ToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect()
}

pub(crate) fn parse_chat_response(body: &Value) -> LlmResponse {
    let choice = &body["choices"][0];
    let message = &choice["message"];

    let text = message["content"].as_str().unwrap_or_default().to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let func = &call["function"];
            let args_str = func["arguments"].as_str().unwrap_or("{}");
            let arguments: Value = serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
            tool_calls.push(ToolCallRequest {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: func["name"].as_str().unwrap_or_default().to_string(),
                arguments,
            });
        }
    }

    LlmResponse {
        text,
        tool_calls,
        stop_reason: choice["finish_reason"].as_str().map(String::from),
    }
}

/// Shared request path for chat-completions style endpoints.
pub(crate) async fn chat_completions(
    client: &Client,
    provider: &str,
    base_url: &str,
    api_key: &str,
    model: &str,
    request: &LlmRequest,
    tools: &[ToolDef],
) -> Result<LlmResponse, LlmError> {
    let url = format!("{}/chat/completions", base_url);

    let mut body = json!({
        "model": model,
        "messages": build_chat_messages(request.system.as_deref(), &request.messages),
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });
    if !tools.is_empty() {
        body["tools"] = json!(build_chat_tools(tools));
    }

    let response = with_retry(&RetryConfig::default(), provider, || async {
        client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
    })
    .await?;

    let parsed: Value = response
        .json()
        .await
        .map_err(|e| LlmError::Communication(format!("{} response parse: {}", provider, e)))?;
    Ok(parse_chat_response(&parsed))
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_streaming: false,
        }
    }

    async fn generate_with_tools(
        &self,
        request: LlmRequest,
        tools: Vec<ToolDef>,
    ) -> Result<LlmResponse, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Authentication("OPENAI_API_KEY is not set".to_string()))?;
        chat_completions(
            &self.client,
            "OpenAI",
            &self.base_url,
            api_key,
            &self.model,
            &request,
            &tools,
        )
        .await
    }

    async fn is_healthy(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_chat_messages_system_first() {
        let msgs = build_chat_messages(Some("be brief"), &[Message::user("hi")]);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[1]["content"], "hi");
    }

    #[test]
    fn test_parse_chat_response_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "get_current_time",
                            "arguments": "{\"timezone\": \"Asia/Tokyo\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_chat_response(&body);
        assert!(resp.text.is_empty());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["timezone"], "Asia/Tokyo");
    }

    #[test]
    fn test_parse_chat_response_bad_arguments_default_to_empty() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "t", "arguments": "not json"}
                    }]
                },
                "finish_reason": "stop"
            }]
        });
        let resp = parse_chat_response(&body);
        assert!(resp.tool_calls[0].arguments.as_object().unwrap().is_empty());
    }
}
