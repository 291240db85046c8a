//! Mock provider — deterministic responses for keyless operation.

use crate::api_types::{Capabilities, LlmRequest, LlmResponse, ToolDef};
use crate::gateway::{LlmClient, LlmError};

#[derive(Debug, Clone)]
pub struct MockProvider {
    model: String,
}

impl MockProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: false,
            supports_streaming: false,
        }
    }

    async fn generate_with_tools(
        &self,
        _request: LlmRequest,
        _tools: Vec<ToolDef>,
    ) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        Ok(LlmResponse::text_only(format!(
            "(Mock {} response) I received your prompt.",
            self.model
        )))
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
