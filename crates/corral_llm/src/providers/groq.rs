//! Groq adapter. Groq exposes an OpenAI-compatible API at
//! api.groq.com/openai/v1, so the conversion logic is shared with the
//! OpenAI adapter.

use crate::api_types::{Capabilities, LlmRequest, LlmResponse, ToolDef};
use crate::gateway::{LlmClient, LlmError};
use crate::providers::openai::chat_completions;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Clone)]
pub struct GroqClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GroqClient {
    pub fn new(model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let base_url = std::env::var("GROQ_BASE_URL")
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

#[async_trait::async_trait]
impl LlmClient for GroqClient {
    fn provider_name(&self) -> &'static str {
        "groq"
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
            .ok_or_else(|| LlmError::Authentication("GROQ_API_KEY is not set".to_string()))?;
        chat_completions(
            &self.client,
            "Groq",
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
