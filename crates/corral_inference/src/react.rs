//! ReAct strategy: interleaved thought / action / observation iterations.
//!
//! State machine per iteration: Think → Decide → { Tool → Observe → Think
//! | Answer → End }, with a hard iteration ceiling and a continuation
//! policy that stops on accumulated useful data, per-tool overuse, or lack
//! of progress.

use crate::placeholder;
use crate::{check_cancelled, fail, generate_text, with_session, Inference, InferenceOptions};
use corral_core::error::CorralError;
use corral_core::observer::ObserverEvent;
use corral_core::tools::Tool;
use corral_mcp::matcher::extract_json_object;
use corral_mcp::McpManager;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Immutable policy: no configuration raises the loop past this.
pub const ITERATION_CEILING: u32 = 7;
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
/// A tool that ran this often without producing useful data stops the loop.
const PER_TOOL_USE_BUDGET: u32 = 3;
/// Domain relevance threshold used to gather the candidate tool set.
const CANDIDATE_THRESHOLD: f32 = 0.3;

/// Effective iteration budget: requested (or the default), clamped to the
/// ceiling.
pub fn iteration_limit(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_MAX_ITERATIONS).clamp(1, ITERATION_CEILING)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObservationKind {
    UsefulData,
    GenericSuccess,
    Error,
}

/// One completed iteration, appended to the run log.
#[derive(Debug, Clone)]
pub struct ReactStep {
    pub thought: String,
    pub action: String,
    pub observation: String,
    pub terminal: bool,
}

#[derive(Debug)]
enum Decision {
    UseTool { name: String, params: Value },
    Final(String),
}

pub struct ReactStrategy {
    manager: Arc<McpManager>,
}

impl ReactStrategy {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }

    async fn think(
        &self,
        query: &str,
        steps: &[ReactStep],
        opts: &InferenceOptions,
    ) -> Result<String, CorralError> {
        let prompt = with_session(
            opts,
            format!(
                "You are working step by step on this question: \"{}\"\n\n{}\n\
                 In one or two sentences, reason about what to do next.",
                query,
                render_steps(steps)
            ),
        );
        generate_text(&self.manager, None, &prompt).await
    }

    async fn decide(
        &self,
        query: &str,
        candidates: &[Tool],
        steps: &[ReactStep],
        thought: &str,
    ) -> Result<Decision, CorralError> {
        let tool_list = if candidates.is_empty() {
            "(no tools available)".to_string()
        } else {
            candidates
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    format!(
                        "{}. {} — {} [parameters: {}]",
                        i + 1,
                        t.name,
                        t.description,
                        t.input_schema.property_names().join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "Question: \"{}\"\n\nYour current reasoning: {}\n\n{}\n\
             Available tools:\n{}\n\n\
             Decide the next action. Reply with exactly one of:\n\
             USE_TOOL {{\"tool_name\": \"<name>\", \"parameters\": {{...}}}}\n\
             FINAL_ANSWER <your complete answer to the question>\n\n\
             Use {{{{RESULT_1}}}} inside a parameter to reference the last \
             successful tool output. Prefer FINAL_ANSWER once you have the data.",
            query,
            thought,
            render_steps(steps),
            tool_list
        );

        let text = generate_text(&self.manager, None, &prompt).await?;
        Ok(parse_decision(&text))
    }

    async fn classify(
        &self,
        success: bool,
        observation: &str,
        query: &str,
    ) -> ObservationKind {
        if !success {
            return ObservationKind::Error;
        }
        if self.manager.is_observation_useful(observation, query).await {
            ObservationKind::UsefulData
        } else {
            ObservationKind::GenericSuccess
        }
    }

    async fn synthesize(
        &self,
        query: &str,
        steps: &[ReactStep],
        opts: &InferenceOptions,
    ) -> Result<String, CorralError> {
        let prompt = with_session(
            opts,
            format!(
                "Answer this question from the investigation log below. If the log \
                 lacks the data, say what could be determined and what failed.\n\n\
                 Question: \"{}\"\n\n{}",
                query,
                render_steps(steps)
            ),
        );
        generate_text(&self.manager, None, &prompt).await
    }
}

#[async_trait::async_trait]
impl Inference for ReactStrategy {
    fn name(&self) -> &'static str {
        "react"
    }

    async fn process_query(
        &self,
        query: &str,
        opts: &InferenceOptions,
    ) -> Result<String, CorralError> {
        opts.observer
            .emit(ObserverEvent::InferenceStart {
                strategy: self.name().to_string(),
            })
            .await;

        let candidates = self.manager.relevant_tools(query, CANDIDATE_THRESHOLD).await;
        opts.observer
            .emit(ObserverEvent::ToolDiscovery {
                names: candidates.iter().map(|t| t.name.clone()).collect(),
            })
            .await;

        let limit = iteration_limit(opts.max_iterations);
        let mut steps: Vec<ReactStep> = Vec::new();
        let mut useful_count = 0u32;
        let mut tool_uses: HashMap<String, u32> = HashMap::new();
        let mut tools_with_useful_data: HashSet<String> = HashSet::new();
        let mut usefulness_log: Vec<bool> = Vec::new();
        let mut last_success: Option<String> = None;

        for iteration in 1..=limit {
            if let Err(e) = check_cancelled(opts) {
                return Err(fail(opts, e).await);
            }

            let thought = match self.think(query, &steps, opts).await {
                Ok(t) => t,
                Err(e) => return Err(fail(opts, e).await),
            };
            opts.observer
                .emit(ObserverEvent::Thought {
                    text: thought.clone(),
                })
                .await;

            if let Err(e) = check_cancelled(opts) {
                return Err(fail(opts, e).await);
            }
            let decision = match self.decide(query, &candidates, &steps, &thought).await {
                Ok(d) => d,
                Err(e) => return Err(fail(opts, e).await),
            };

            match decision {
                Decision::Final(answer) => {
                    steps.push(ReactStep {
                        thought,
                        action: "FINAL_ANSWER".to_string(),
                        observation: answer.clone(),
                        terminal: true,
                    });
                    tracing::debug!("react finished after {} iteration(s)", iteration);
                    opts.observer
                        .emit(ObserverEvent::InferenceComplete {
                            text: answer.clone(),
                        })
                        .await;
                    return Ok(answer);
                }
                Decision::UseTool { name, params } => {
                    let params = match &last_success {
                        Some(output) => placeholder::substitute(&params, &[output.clone()]),
                        None => params,
                    };

                    opts.observer
                        .emit(ObserverEvent::ToolSelection {
                            name: name.clone(),
                            args: params.clone(),
                        })
                        .await;
                    let result = self.manager.execute_tool(&name, &params).await;
                    opts.observer
                        .emit(ObserverEvent::ToolExecution {
                            name: name.clone(),
                            result: result.clone(),
                        })
                        .await;

                    let observation = if result.success {
                        result.content.clone()
                    } else {
                        format!("error: {}", result.message)
                    };
                    let kind = self.classify(result.success, &observation, query).await;

                    *tool_uses.entry(name.clone()).or_insert(0) += 1;
                    match kind {
                        ObservationKind::UsefulData => {
                            useful_count += 1;
                            tools_with_useful_data.insert(name.clone());
                            last_success = Some(result.content.clone());
                        }
                        ObservationKind::GenericSuccess => {
                            last_success = Some(result.content.clone());
                        }
                        ObservationKind::Error => {}
                    }
                    usefulness_log.push(kind == ObservationKind::UsefulData);

                    steps.push(ReactStep {
                        thought,
                        action: format!("USE_TOOL {}", name),
                        observation,
                        terminal: false,
                    });

                    // Continuation policy.
                    if useful_count >= 2 {
                        tracing::debug!("react stop: enough useful data");
                        break;
                    }
                    if tool_uses[&name] >= PER_TOOL_USE_BUDGET
                        && !tools_with_useful_data.contains(&name)
                    {
                        tracing::debug!("react stop: tool '{}' exhausted its budget", name);
                        break;
                    }
                    if usefulness_log.len() >= 3
                        && usefulness_log.iter().rev().take(2).all(|useful| !useful)
                    {
                        tracing::debug!("react stop: no progress");
                        break;
                    }
                }
            }
        }

        // Budget or policy ended the loop; synthesize from the log.
        match self.synthesize(query, &steps, opts).await {
            Ok(answer) => {
                opts.observer
                    .emit(ObserverEvent::InferenceComplete {
                        text: answer.clone(),
                    })
                    .await;
                Ok(answer)
            }
            Err(e) => Err(fail(opts, e).await),
        }
    }
}

fn render_steps(steps: &[ReactStep]) -> String {
    if steps.is_empty() {
        return "No steps taken yet.".to_string();
    }
    let mut out = String::from("Steps so far:\n");
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!(
            "{}. thought: {}\n   action: {}\n   observation: {}\n",
            i + 1,
            step.thought,
            step.action,
            truncate(&step.observation, 400)
        ));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}

/// Parse the action decision; whichever keyword appears first wins, and
/// anything unparseable is treated as a final answer.
fn parse_decision(text: &str) -> Decision {
    let final_pos = text.find("FINAL_ANSWER");
    let tool_pos = text.find("USE_TOOL");

    match (tool_pos, final_pos) {
        (Some(t), f) if f.map(|f| t < f).unwrap_or(true) => {
            let tail = &text[t + "USE_TOOL".len()..];
            if let Some(value) = extract_json_object(tail) {
                let name = value
                    .get("tool_name")
                    .or_else(|| value.get("name"))
                    .or_else(|| value.get("tool"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if !name.is_empty() {
                    let params = value
                        .get("parameters")
                        .or_else(|| value.get("arguments"))
                        .cloned()
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                    return Decision::UseTool { name, params };
                }
            }
            Decision::Final(text.trim().to_string())
        }
        (_, Some(f)) => {
            let tail = text[f + "FINAL_ANSWER".len()..]
                .trim_start_matches([':', ' ', '\n'])
                .trim()
                .to_string();
            if tail.is_empty() {
                Decision::Final(text.trim().to_string())
            } else {
                Decision::Final(tail)
            }
        }
        _ => Decision::Final(text.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_limit_clamps_to_ceiling() {
        assert_eq!(iteration_limit(None), DEFAULT_MAX_ITERATIONS);
        assert_eq!(iteration_limit(Some(3)), 3);
        assert_eq!(iteration_limit(Some(50)), ITERATION_CEILING);
        assert_eq!(iteration_limit(Some(0)), 1);
    }

    #[test]
    fn test_parse_decision_use_tool() {
        let text = r#"USE_TOOL {"tool_name": "get_forecast", "parameters": {"latitude": -15.78}}"#;
        match parse_decision(text) {
            Decision::UseTool { name, params } => {
                assert_eq!(name, "get_forecast");
                assert_eq!(params["latitude"], -15.78);
            }
            other => panic!("expected UseTool, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decision_final_answer() {
        match parse_decision("FINAL_ANSWER: The weather in Brasília is sunny.") {
            Decision::Final(text) => assert!(text.starts_with("The weather")),
            other => panic!("expected Final, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decision_garbage_is_final() {
        match parse_decision("I am not sure what to do.") {
            Decision::Final(text) => assert_eq!(text, "I am not sure what to do."),
            other => panic!("expected Final, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decision_use_tool_without_json_falls_back() {
        match parse_decision("USE_TOOL but no json here") {
            Decision::Final(_) => {}
            other => panic!("expected Final fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decision_first_keyword_wins() {
        let text = r#"USE_TOOL {"tool_name": "t", "parameters": {}} ... FINAL_ANSWER nope"#;
        assert!(matches!(parse_decision(text), Decision::UseTool { .. }));
    }
}
