//! The LLM gateway contract. Adapters translate to provider wire formats
//! and convert every failure into a typed `LlmError` — nothing below this
//! trait throws across the module boundary.

use crate::api_types::{Capabilities, LlmRequest, LlmResponse, ToolDef};
use async_trait::async_trait;
use corral_core::error::CorralError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("authentication: {0}")]
    Authentication(String),
    #[error("rate limit: {0}")]
    RateLimit(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("communication: {0}")]
    Communication(String),
    #[error("tool error: {0}")]
    ToolError(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown: {0}")]
    Unknown(String),
}

impl From<LlmError> for CorralError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Authentication(m) => CorralError::LlmAuthentication(m),
            LlmError::RateLimit(m) => CorralError::LlmRateLimit(m),
            LlmError::Timeout(m) => CorralError::LlmTimeout(m),
            LlmError::Communication(m)
            | LlmError::ToolError(m)
            | LlmError::InvalidRequest(m)
            | LlmError::Unknown(m) => CorralError::LlmCommunication(m),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Completion with tool definitions the model may call.
    async fn generate_with_tools(
        &self,
        request: LlmRequest,
        tools: Vec<ToolDef>,
    ) -> Result<LlmResponse, LlmError>;

    /// Plain text completion.
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.generate_with_tools(request, Vec::new()).await
    }

    /// Whether the client is usable right now (key present, endpoint sane).
    async fn is_healthy(&self) -> bool;
}
