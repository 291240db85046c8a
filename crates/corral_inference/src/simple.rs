//! Simple strategy: classify the query, run zero, one, or a short chain of
//! tools, then synthesize the answer in a single pass.

use crate::placeholder;
use crate::{check_cancelled, fail, generate_text, with_session, Inference, InferenceOptions};
use corral_core::error::CorralError;
use corral_core::observer::ObserverEvent;
use corral_core::tools::ToolExecutionResult;
use corral_mcp::{McpManager, QueryKind, Selection};
use std::sync::Arc;

pub struct SimpleStrategy {
    manager: Arc<McpManager>,
}

impl SimpleStrategy {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }

    async fn direct_answer(
        &self,
        query: &str,
        opts: &InferenceOptions,
    ) -> Result<String, CorralError> {
        let prompt = with_session(opts, format!("Answer the user's question.\n\nQuestion: {}", query));
        generate_text(&self.manager, None, &prompt).await
    }

    async fn run_single(
        &self,
        query: &str,
        selection: Selection,
        opts: &InferenceOptions,
    ) -> Result<String, CorralError> {
        let Some((tool, args)) = selection.into_iter().next() else {
            return self.direct_answer(query, opts).await;
        };
        check_cancelled(opts)?;

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

        let prompt = with_session(
            opts,
            format!(
                "Answer the user's question using the tool output.\n\n\
                 Question: {}\n\nTool `{}` output:\n{}\n\n\
                 Give a direct, complete answer.",
                query,
                tool.name,
                render_result(&result)
            ),
        );
        generate_text(&self.manager, None, &prompt).await
    }

    async fn run_plan(
        &self,
        query: &str,
        plan: Selection,
        opts: &InferenceOptions,
    ) -> Result<String, CorralError> {
        let mut successful_outputs: Vec<String> = Vec::new();
        let mut transcript: Vec<String> = Vec::new();

        for (tool, args) in plan {
            check_cancelled(opts)?;

            // Chain prior outputs into this call before invoking it.
            let args = placeholder::substitute(&args, &successful_outputs);

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

            transcript.push(format!("{}: {}", tool.name, render_result(&result)));
            if result.success {
                successful_outputs.push(result.content);
            }
        }

        let prompt = with_session(
            opts,
            format!(
                "Answer the user's question using the executed tool steps.\n\n\
                 Question: {}\n\nSteps:\n{}\n\n\
                 Give a direct, complete answer confirming what was done.",
                query,
                transcript.join("\n")
            ),
        );
        generate_text(&self.manager, None, &prompt).await
    }
}

fn render_result(result: &ToolExecutionResult) -> String {
    if result.success {
        result.content.clone()
    } else {
        format!("(failed: {})", result.message)
    }
}

#[async_trait::async_trait]
impl Inference for SimpleStrategy {
    fn name(&self) -> &'static str {
        "simple"
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

        let analysis = self.manager.analyze_query(query).await;
        tracing::debug!("query classified as {:?}: {}", analysis.kind, analysis.rationale);

        let answer = match analysis.kind {
            QueryKind::DirectAnswer => self.direct_answer(query, opts).await,
            QueryKind::SingleTool => {
                let selection = self.manager.find_single_step_tools(query).await;
                opts.observer
                    .emit(ObserverEvent::ToolDiscovery {
                        names: selection.iter().map(|(t, _)| t.name.clone()).collect(),
                    })
                    .await;
                if selection.is_empty() {
                    // No tool matched after all; answer from knowledge.
                    self.direct_answer(query, opts).await
                } else {
                    self.run_single(query, selection, opts).await
                }
            }
            QueryKind::MultiTool => {
                let plan = self.manager.find_multi_step_tools(query).await;
                opts.observer
                    .emit(ObserverEvent::ToolDiscovery {
                        names: plan.iter().map(|(t, _)| t.name.clone()).collect(),
                    })
                    .await;
                if plan.is_empty() {
                    self.direct_answer(query, opts).await
                } else {
                    self.run_plan(query, plan, opts).await
                }
            }
        };

        match answer {
            Ok(text) => {
                opts.observer
                    .emit(ObserverEvent::InferenceComplete { text: text.clone() })
                    .await;
                Ok(text)
            }
            Err(e) => Err(fail(opts, e).await),
        }
    }
}
