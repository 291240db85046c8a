//! LLM-powered tool selection. Prompts ask for JSON in every case; parsing
//! is defensive — code fences are stripped, surrounding commentary is
//! tolerated, bad tool numbers are discarded silently, and an empty
//! selection is a valid outcome.

use corral_core::error::CorralError;
use corral_core::tools::{coerce_value, Tool};
use corral_llm::{LlmClient, LlmRequest};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Ordered (tool, extracted args) selection.
pub type Selection = Vec<(Tool, Value)>;

pub struct ToolMatcher;

impl ToolMatcher {
    /// Prompt for picking one tool and extracting its parameters.
    pub fn build_single_prompt(query: &str, tools: &[Tool]) -> String {
        let mut lines = vec![
            "You select the single best tool for a user query and extract its parameters."
                .to_string(),
            String::new(),
            format!("User query: \"{}\"", query),
            String::new(),
            "Available tools:".to_string(),
        ];
        lines.push(render_tool_list(tools));
        lines.push(String::new());
        lines.push(
            "Infer missing required parameters from world knowledge (for example the \
             latitude/longitude of a named city, or the IANA timezone of a place)."
                .to_string(),
        );
        lines.push(
            "Respond with JSON only: {\"tool_number\": <1-based index>, \"parameters\": {...}}. \
             If no tool fits, respond with {\"tool_number\": 0}."
                .to_string(),
        );
        lines.join("\n")
    }

    /// Prompt for an ordered multi-tool plan with `{{RESULT_n}}` chaining.
    pub fn build_plan_prompt(query: &str, tools: &[Tool]) -> String {
        let mut lines = vec![
            "You plan the minimum ordered set of tool calls that answers a user query."
                .to_string(),
            String::new(),
            format!("User query: \"{}\"", query),
            String::new(),
            "Available tools:".to_string(),
        ];
        lines.push(render_tool_list(tools));
        lines.push(String::new());
        lines.push(
            "When a parameter depends on the output of an earlier call, use the placeholder \
             \"{{RESULT_n}}\" where n is the 1-based position of that call in your plan."
                .to_string(),
        );
        lines.push(
            "Respond with JSON only, preserving execution order: \
             {\"tools\": [{\"tool_number\": <1-based index>, \"parameters\": {...}}, ...]}. \
             Use the minimum set of tools. If none fit, respond with {\"tools\": []}."
                .to_string(),
        );
        lines.join("\n")
    }

    /// Send a selection prompt and extract the JSON object from the reply.
    pub async fn request_selection(
        llm: &Arc<dyn LlmClient>,
        prompt: &str,
    ) -> Result<Value, CorralError> {
        let response = llm
            .generate(LlmRequest::from_prompt(None, prompt))
            .await
            .map_err(CorralError::from)?;
        extract_json_object(&response.text).ok_or_else(|| {
            CorralError::LlmCommunication(format!(
                "no JSON object in selection reply: {}",
                response.text.chars().take(200).collect::<String>()
            ))
        })
    }

    /// Parse a single-tool reply. Accepts the plan shape too, taking the
    /// whole list in order.
    pub fn parse_single(value: &Value, tools: &[Tool]) -> Selection {
        if value.get("tools").is_some() {
            return Self::parse_plan(value, tools);
        }
        parse_entry(value, tools).into_iter().collect()
    }

    /// Parse a plan reply, preserving order. Invalid entries are dropped.
    pub fn parse_plan(value: &Value, tools: &[Tool]) -> Selection {
        value
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| parse_entry(e, tools))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse one `{tool_number, parameters}` entry; 1-indexed, out-of-range
/// numbers (including the explicit 0 for "nothing fits") yield None.
fn parse_entry(value: &Value, tools: &[Tool]) -> Option<(Tool, Value)> {
    let number = value.get("tool_number")?.as_u64()? as usize;
    if number == 0 || number > tools.len() {
        return None;
    }
    let tool = tools[number - 1].clone();
    let raw = value
        .get("parameters")
        .cloned()
        .unwrap_or(Value::Object(Map::new()));
    let params = coerce_parameters(&tool, raw);
    Some((tool, params))
}

/// Coerce each present parameter to its schema type. Validation of
/// required parameters and defaults happens at call time.
pub fn coerce_parameters(tool: &Tool, params: Value) -> Value {
    let Value::Object(map) = params else {
        return Value::Object(Map::new());
    };
    let coerced: Map<String, Value> = map
        .into_iter()
        .map(|(k, v)| {
            let ty = tool.input_schema.property_type(&k);
            let v = coerce_value(ty, v);
            (k, v)
        })
        .collect();
    Value::Object(coerced)
}

fn render_tool_list(tools: &[Tool]) -> String {
    tools
        .iter()
        .enumerate()
        .map(|(i, tool)| {
            let params = tool
                .input_schema
                .property_names()
                .iter()
                .map(|name| {
                    let ty = tool.input_schema.property_type(name).unwrap_or("any");
                    let req = if tool.input_schema.required.iter().any(|r| r == name) {
                        ", required"
                    } else {
                        ""
                    };
                    format!("{} ({}{})", name, ty, req)
                })
                .collect::<Vec<_>>()
                .join(", ");
            if params.is_empty() {
                format!("{}. {} — {}", i + 1, tool.name, tool.description)
            } else {
                format!(
                    "{}. {} — {} [parameters: {}]",
                    i + 1,
                    tool.name,
                    tool.description,
                    params
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip Markdown code fences from LLM output.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix("```") {
        // Drop an optional language tag on the fence line
        let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or(inner);
        let inner = inner.strip_suffix("```").unwrap_or(inner);
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

/// Extract the outermost JSON object from text that may carry commentary
/// before or after it.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let cleaned = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&cleaned[start..=end]).ok()
}
