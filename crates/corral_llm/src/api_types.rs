//! Provider-neutral request/response types. Each adapter converts these to
//! and from its provider's wire format.

use corral_core::tools::ToolInputSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tool definition handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

impl From<&corral_core::tools::Tool> for ToolDef {
    fn from(tool: &corral_core::tools::Tool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system: None,
            messages,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    /// Single user prompt with an optional system preamble.
    pub fn from_prompt(system: Option<&str>, prompt: &str) -> Self {
        Self {
            system: system.map(String::from),
            messages: vec![Message::user(prompt)],
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// A structured tool call returned by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Provider-neutral completion result: text, structured tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: Some("end_turn".to_string()),
        }
    }
}

/// What a provider can do; callers branch on this instead of probing.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
}
