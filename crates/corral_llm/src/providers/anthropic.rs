//! Claude adapter — Anthropic Messages API.

use crate::api_types::{
    Capabilities, LlmRequest, LlmResponse, Message, Role, ToolCallRequest, ToolDef,
};
use crate::gateway::{LlmClient, LlmError};
use crate::retry::{with_retry, RetryConfig};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Communication(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url,
            model: model.to_string(),
        })
    }

    fn key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| LlmError::Authentication("ANTHROPIC_API_KEY is not set".to_string()))
    }
}

fn build_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({"role": role, "content": m.content})
        })
        .collect()
}

fn build_tools(tools: &[ToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect()
}

fn parse_response(body: &Value) -> LlmResponse {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = body["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text_parts.push(t.to_string());
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCallRequest {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].clone(),
                    });
                }
                _ => {}
            }
        }
    }

    LlmResponse {
        text: text_parts.join("\n"),
        tool_calls,
        stop_reason: body["stop_reason"].as_str().map(String::from),
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &'static str {
        "claude"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_streaming: false,
        }
    }

    #[tracing::instrument(skip(self, request, tools), fields(model = %self.model))]
    async fn generate_with_tools(
        &self,
        request: LlmRequest,
        tools: Vec<ToolDef>,
    ) -> Result<LlmResponse, LlmError> {
        let api_key = self.key()?.to_string();
        let url = format!("{}/v1/messages", self.base_url);

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": build_messages(&request.messages),
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(build_tools(&tools));
        }

        let response = with_retry(&RetryConfig::default(), "Anthropic", || async {
            self.client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await
        })
        .await?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Communication(format!("Anthropic response parse: {}", e)))?;
        Ok(parse_response(&parsed))
    }

    async fn is_healthy(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_and_tool_use() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Checking the forecast."},
                {"type": "tool_use", "id": "tu_1", "name": "get_forecast",
                 "input": {"latitude": -15.78, "longitude": -47.88}}
            ],
            "stop_reason": "tool_use"
        });
        let resp = parse_response(&body);
        assert_eq!(resp.text, "Checking the forecast.");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "get_forecast");
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
    }

    #[tokio::test]
    async fn test_missing_key_is_authentication_error() {
        let client =
            AnthropicClient::new("claude-test", None, Duration::from_secs(5)).unwrap();
        assert!(!client.is_healthy().await);
        let err = client
            .generate(LlmRequest::from_prompt(None, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Authentication(_)));
    }
}
