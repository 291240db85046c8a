//! `{{RESULT_n}}` substitution for chained tool plans. Positional and
//! 1-indexed over the prior *successful* results of the current plan.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static RE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{RESULT_(\d+)\}\}").unwrap());

/// Replace every `{{RESULT_n}}` in string values with `results[n-1]`.
/// Out-of-range placeholders are left untouched.
pub fn substitute(args: &Value, results: &[String]) -> Value {
    match args {
        Value::String(s) => Value::String(substitute_str(s, results)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute(v, results)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, results)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(s: &str, results: &[String]) -> String {
    RE_PLACEHOLDER
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let n: usize = caps[1].parse().unwrap_or(0);
            if n >= 1 && n <= results.len() {
                results[n - 1].clone()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

pub fn contains_placeholder(args: &Value) -> bool {
    match args {
        Value::String(s) => RE_PLACEHOLDER.is_match(s),
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(map) => map.values().any(contains_placeholder),
        _ => false,
    }
}
