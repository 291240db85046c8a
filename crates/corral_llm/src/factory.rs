//! Provider selection by name.

use crate::gateway::LlmClient;
use crate::providers::anthropic::AnthropicClient;
use crate::providers::gemini::GeminiClient;
use crate::providers::groq::GroqClient;
use crate::providers::mock::MockProvider;
use crate::providers::openai::OpenAiClient;
use corral_core::config::Credentials;
use corral_core::error::CorralError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Claude,
    OpenAi,
    Gemini,
    Groq,
    Mock,
}

impl Provider {
    pub fn env_key(&self) -> Option<&'static str> {
        match self {
            Provider::Claude => Some("ANTHROPIC_API_KEY"),
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::Mock => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Claude => "claude-4-5-sonnet-20250929",
            Provider::OpenAi => "gpt-4o",
            Provider::Gemini => "gemini-2.0-flash",
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::Mock => "mock-model",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::Mock => "mock",
        }
    }
}

impl FromStr for Provider {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Provider::Claude),
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            "groq" => Ok(Provider::Groq),
            "mock" => Ok(Provider::Mock),
            other => Err(CorralError::Configuration(format!(
                "unknown LLM provider '{}' (expected openai|claude|gemini|groq)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build a client for the provider. `model` empty means the provider
/// default. A missing API key is not an error here — the client reports
/// unhealthy and fails calls with `Authentication`.
pub fn build_client(
    provider: Provider,
    model: &str,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<Arc<dyn LlmClient>, CorralError> {
    let model = if model.is_empty() {
        provider.default_model()
    } else {
        model
    };
    let api_key = provider.env_key().and_then(|key| credentials.get(key));
    if api_key.is_none() && provider != Provider::Mock {
        tracing::warn!(
            "no API key for provider '{}'; calls will fail until {} is set",
            provider,
            provider.env_key().unwrap_or_default()
        );
    }

    let client: Arc<dyn LlmClient> = match provider {
        Provider::Claude => Arc::new(
            AnthropicClient::new(model, api_key, timeout)
                .map_err(|e| CorralError::Configuration(e.to_string()))?,
        ),
        Provider::OpenAi => Arc::new(
            OpenAiClient::new(model, api_key, timeout)
                .map_err(|e| CorralError::Configuration(e.to_string()))?,
        ),
        Provider::Gemini => Arc::new(
            GeminiClient::new(model, api_key, timeout)
                .map_err(|e| CorralError::Configuration(e.to_string()))?,
        ),
        Provider::Groq => Arc::new(
            GroqClient::new(model, api_key, timeout)
                .map_err(|e| CorralError::Configuration(e.to_string()))?,
        ),
        Provider::Mock => Arc::new(MockProvider::new(model)),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!(Provider::from_str("claude").unwrap(), Provider::Claude);
        assert_eq!(Provider::from_str("Anthropic").unwrap(), Provider::Claude);
        assert_eq!(Provider::from_str("GROQ").unwrap(), Provider::Groq);
        assert!(Provider::from_str("palm").is_err());
    }

    #[test]
    fn test_build_mock_needs_no_key() {
        let client = build_client(
            Provider::Mock,
            "",
            &Credentials::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.provider_name(), "mock");
    }
}
