//! Gemini adapter — Google Generative Language API (`generateContent`).

use crate::api_types::{
    Capabilities, LlmRequest, LlmResponse, Message, Role, ToolCallRequest, ToolDef,
};
use crate::gateway::{LlmClient, LlmError};
use crate::retry::{with_retry, RetryConfig};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let base_url = std::env::var("GEMINI_BASE_URL")
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

/// Gemini uses role "model" for assistant turns and wraps text in parts.
fn build_contents(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({"role": role, "parts": [{"text": m.content}]})
        })
        .collect()
}

fn build_tools(tools: &[ToolDef]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.input_schema,
            })
        })
        .collect();
    json!([{"functionDeclarations": declarations}])
}

fn parse_response(body: &Value) -> LlmResponse {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(parts) = body["candidates"][0]["content"]["parts"].as_array() {
        for (i, part) in parts.iter().enumerate() {
            if let Some(t) = part["text"].as_str() {
                text_parts.push(t.to_string());
            }
            if let Some(call) = part.get("functionCall") {
                tool_calls.push(ToolCallRequest {
                    id: format!("fc_{}", i),
                    name: call["name"].as_str().unwrap_or_default().to_string(),
                    arguments: call["args"].clone(),
                });
            }
        }
    }

    LlmResponse {
        text: text_parts.join("\n"),
        tool_calls,
        stop_reason: body["candidates"][0]["finishReason"]
            .as_str()
            .map(String::from),
    }
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    fn provider_name(&self) -> &'static str {
        "gemini"
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
            .ok_or_else(|| LlmError::Authentication("GEMINI_API_KEY is not set".to_string()))?
            .to_string();
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let mut body = json!({
            "contents": build_contents(&request.messages),
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            }
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            body["tools"] = build_tools(&tools);
        }

        let response = with_retry(&RetryConfig::default(), "Gemini", || async {
            self.client
                .post(&url)
                .header("x-goog-api-key", &api_key)
                .json(&body)
                .send()
                .await
        })
        .await?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Communication(format!("Gemini response parse: {}", e)))?;
        Ok(parse_response(&parsed))
    }

    async fn is_healthy(&self) -> bool {
        self.api_key.is_some()
    }
}
