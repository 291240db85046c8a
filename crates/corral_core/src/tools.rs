//! Tool abstraction types — shared between the MCP fleet and the inference
//! strategies, so neither has to depend on the other.

use crate::error::{CorralError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON Schema (draft 7 subset) for a tool's input parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: Value,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolInputSchema {
    pub fn empty() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Value::Object(Map::new()),
            required: Vec::new(),
        }
    }

    /// Declared `type` of one property, when present.
    pub fn property_type(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
    }

    /// Declared `default` of one property, when present.
    pub fn property_default(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).and_then(|p| p.get("default"))
    }

    pub fn property_names(&self) -> Vec<String> {
        self.properties
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A named, schema-described callable hosted by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub server_id: String,
    pub domain: Option<String>,
    pub input_schema: ToolInputSchema,
}

/// Structured result of one tool invocation.
///
/// Invariant: `success` implies `error` is `None`; failure implies a
/// non-empty `message`.
#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub success: bool,
    pub tool: String,
    pub content: String,
    pub error: Option<ErrorKind>,
    pub message: String,
}

impl ToolExecutionResult {
    pub fn ok(tool: &str, content: String) -> Self {
        Self {
            success: true,
            tool: tool.to_string(),
            content,
            error: None,
            message: String::new(),
        }
    }

    pub fn failure(tool: &str, kind: ErrorKind, message: String) -> Self {
        let message = if message.is_empty() {
            "tool execution failed".to_string()
        } else {
            message
        };
        Self {
            success: false,
            tool: tool.to_string(),
            content: String::new(),
            error: Some(kind),
            message,
        }
    }
}

/// Trait for executable tools registered in the catalog.
///
/// MCP-discovered tools get one handler each (bridged over the server's
/// peer); tests register scripted handlers directly.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Unique name used for dispatch (must match `spec().name`).
    fn name(&self) -> &str;

    /// Full tool description including schema and origin server.
    fn spec(&self) -> Tool;

    /// Execute the tool with the given JSON arguments.
    async fn execute(&self, args: &Value) -> ToolExecutionResult;
}

/// Validate `args` against `schema`: reject missing required parameters,
/// fill defaults for absent optional ones, and coerce each value to its
/// declared type.
pub fn coerce_arguments(schema: &ToolInputSchema, args: &Value) -> Result<Value, CorralError> {
    let mut map = match args {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(CorralError::ParameterInvalid(format!(
                "expected object arguments, got {}",
                other
            )))
        }
    };

    for name in schema.property_names() {
        match map.get(&name) {
            Some(value) => {
                let coerced = coerce_value(schema.property_type(&name), value.clone());
                map.insert(name, coerced);
            }
            None => {
                if let Some(default) = schema.property_default(&name) {
                    map.insert(name, default.clone());
                } else if schema.required.iter().any(|r| r == &name) {
                    return Err(CorralError::ParameterInvalid(format!(
                        "missing required parameter '{}'",
                        name
                    )));
                }
            }
        }
    }

    Ok(Value::Object(map))
}

/// Coerce one parameter value to the declared JSON-schema type.
///
/// Placeholder strings (`{{RESULT_n}}`) are passed through untouched so a
/// later substitution pass can resolve them.
pub fn coerce_value(declared: Option<&str>, value: Value) -> Value {
    if let Value::String(s) = &value {
        if s.contains("{{RESULT_") {
            return value;
        }
    }

    match declared {
        Some("string") => match value {
            Value::String(_) => value,
            other => Value::String(stringify(&other)),
        },
        Some("number") => match &value {
            Value::Number(_) => value,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(value),
            _ => value,
        },
        Some("integer") => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => value,
            Value::Number(n) => n
                .as_f64()
                .map(|f| Value::Number((f as i64).into()))
                .unwrap_or(value),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| Value::Number(i.into()))
                .unwrap_or(value),
            _ => value,
        },
        Some("boolean") => match &value {
            Value::Bool(_) => value,
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Value::Bool(true),
                "false" | "no" | "0" => Value::Bool(false),
                _ => value,
            },
            _ => value,
        },
        Some("array") => match &value {
            Value::Array(_) => value,
            // Comma-split fallback for models that hand back "a, b, c".
            Value::String(s) => Value::Array(
                s.split(',')
                    .map(|p| Value::String(p.trim().to_string()))
                    .collect(),
            ),
            _ => value,
        },
        _ => value,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
