//! Reflection strategy: draft, critique against a fixed rubric, refine,
//! until the quality score clears the threshold or the rounds run out.

use crate::{check_cancelled, fail, generate_text, with_session, Inference, InferenceOptions};
use corral_core::error::CorralError;
use corral_core::observer::ObserverEvent;
use corral_mcp::matcher::extract_json_object;
use corral_mcp::{McpManager, QueryKind};
use std::sync::Arc;

pub const DEFAULT_MAX_ROUNDS: u32 = 3;
pub const DEFAULT_QUALITY_THRESHOLD: f32 = 0.85;

/// One critique/refine cycle, appended to the round log.
#[derive(Debug, Clone)]
pub struct ReflectionRound {
    pub draft: String,
    pub critique: String,
    pub score: f32,
    pub refined: Option<String>,
}

pub struct ReflectionStrategy {
    manager: Arc<McpManager>,
    quality_threshold: f32,
}

impl ReflectionStrategy {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self {
            manager,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
        }
    }

    pub fn with_quality_threshold(mut self, threshold: f32) -> Self {
        self.quality_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Gather tool output for the draft when the query is not answerable
    /// directly.
    async fn tool_context(&self, query: &str, opts: &InferenceOptions) -> Option<String> {
        let analysis = self.manager.analyze_query(query).await;
        if analysis.kind == QueryKind::DirectAnswer {
            return None;
        }

        let selection = self.manager.find_single_step_tools(query).await;
        opts.observer
            .emit(ObserverEvent::ToolDiscovery {
                names: selection.iter().map(|(t, _)| t.name.clone()).collect(),
            })
            .await;
        let (tool, args) = selection.into_iter().next()?;
        opts.observer
            .emit(ObserverEvent::ToolSelection {
                name: tool.name.clone(),
                args: args.clone(),
            })
            .await;
        let result = self.manager.execute_tool(&tool.name, &args).await;
        opts.observer
            .emit(ObserverEvent::ToolExecution {
                name: tool.name.clone(),
                result: result.clone(),
            })
            .await;
        result
            .success
            .then(|| format!("Tool `{}` output:\n{}", tool.name, result.content))
    }

    async fn draft(
        &self,
        query: &str,
        tool_context: Option<&str>,
        opts: &InferenceOptions,
    ) -> Result<String, CorralError> {
        let context = tool_context
            .map(|c| format!("\n\n{}", c))
            .unwrap_or_default();
        let prompt = with_session(
            opts,
            format!(
                "Write a complete answer to the user's question.{}\n\nQuestion: {}",
                context, query
            ),
        );
        generate_text(&self.manager, None, &prompt).await
    }

    async fn critique(&self, query: &str, answer: &str) -> Result<(String, f32), CorralError> {
        let prompt = format!(
            "Critique this answer on four criteria: completeness, accuracy, clarity, \
             relevance. Score each 0.0-1.0 and give an overall quality score.\n\n\
             Question: {}\n\nAnswer:\n{}\n\n\
             Respond with JSON only: {{\"completeness\": <s>, \"accuracy\": <s>, \
             \"clarity\": <s>, \"relevance\": <s>, \"overall\": <s>, \
             \"remarks\": \"<what to improve>\"}}",
            query, answer
        );
        let text = generate_text(&self.manager, None, &prompt).await?;
        let value = extract_json_object(&text).ok_or_else(|| {
            CorralError::LlmCommunication("critique reply carried no JSON".to_string())
        })?;

        let overall = value
            .get("overall")
            .and_then(|v| v.as_f64())
            .map(|s| s as f32)
            .unwrap_or_else(|| {
                // Average the rubric when the overall score is missing.
                let parts: Vec<f32> = ["completeness", "accuracy", "clarity", "relevance"]
                    .iter()
                    .filter_map(|k| value.get(*k).and_then(|v| v.as_f64()).map(|s| s as f32))
                    .collect();
                if parts.is_empty() {
                    0.0
                } else {
                    parts.iter().sum::<f32>() / parts.len() as f32
                }
            })
            .clamp(0.0, 1.0);
        let remarks = value
            .get("remarks")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string();
        Ok((remarks, overall))
    }

    async fn refine(
        &self,
        query: &str,
        answer: &str,
        critique: &str,
    ) -> Result<String, CorralError> {
        let prompt = format!(
            "Improve this answer using the critique. Return only the improved answer.\n\n\
             Question: {}\n\nCurrent answer:\n{}\n\nCritique:\n{}",
            query, answer, critique
        );
        generate_text(&self.manager, None, &prompt).await
    }
}

#[async_trait::async_trait]
impl Inference for ReflectionStrategy {
    fn name(&self) -> &'static str {
        "reflection"
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
        if let Err(e) = check_cancelled(opts) {
            return Err(fail(opts, e).await);
        }

        let tool_context = self.tool_context(query, opts).await;
        let mut answer = match self.draft(query, tool_context.as_deref(), opts).await {
            Ok(text) => text,
            Err(e) => return Err(fail(opts, e).await),
        };
        opts.observer
            .emit(ObserverEvent::PartialResponse {
                text: answer.clone(),
            })
            .await;

        let max_rounds = opts.max_iterations.unwrap_or(DEFAULT_MAX_ROUNDS).max(1);
        let mut rounds: Vec<ReflectionRound> = Vec::new();

        for round in 1..=max_rounds {
            if let Err(e) = check_cancelled(opts) {
                return Err(fail(opts, e).await);
            }

            let (remarks, score) = match self.critique(query, &answer).await {
                Ok(c) => c,
                Err(e) => {
                    // Critique parsing failed; the current answer stands.
                    tracing::debug!("critique failed in round {}: {}", round, e);
                    break;
                }
            };
            opts.observer
                .emit(ObserverEvent::Thought {
                    text: format!("critique (score {:.2}): {}", score, remarks),
                })
                .await;

            if score >= self.quality_threshold {
                rounds.push(ReflectionRound {
                    draft: answer.clone(),
                    critique: remarks,
                    score,
                    refined: None,
                });
                break;
            }

            let refined = match self.refine(query, &answer, &remarks).await {
                Ok(text) => text,
                Err(e) => return Err(fail(opts, e).await),
            };
            opts.observer
                .emit(ObserverEvent::PartialResponse {
                    text: refined.clone(),
                })
                .await;
            rounds.push(ReflectionRound {
                draft: answer.clone(),
                critique: remarks,
                score,
                refined: Some(refined.clone()),
            });
            answer = refined;
        }

        tracing::debug!("reflection finished after {} round(s)", rounds.len());
        opts.observer
            .emit(ObserverEvent::InferenceComplete {
                text: answer.clone(),
            })
            .await;
        Ok(answer)
    }
}
