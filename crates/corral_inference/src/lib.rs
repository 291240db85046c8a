//! Inference strategies: Simple, ReAct, and Reflection behind one
//! contract. A strategy borrows a non-owning manager handle, drives the
//! query → tool-call → answer loop, and reports progress through the
//! observer channel.

pub mod placeholder;
pub mod react;
pub mod reflection;
pub mod simple;

use corral_core::cancel::CancelToken;
use corral_core::error::CorralError;
use corral_core::observer::{Observer, ObserverEvent};
use corral_core::session::SessionContext;
use corral_llm::LlmRequest;
use corral_mcp::McpManager;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use react::ReactStrategy;
pub use reflection::ReflectionStrategy;
pub use simple::SimpleStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Simple,
    React,
    Reflection,
}

impl FromStr for StrategyKind {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(StrategyKind::Simple),
            "react" => Ok(StrategyKind::React),
            "reflection" => Ok(StrategyKind::Reflection),
            other => Err(CorralError::Configuration(format!(
                "unknown strategy '{}' (expected simple|react|reflection)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StrategyKind::Simple => "simple",
            StrategyKind::React => "react",
            StrategyKind::Reflection => "reflection",
        })
    }
}

/// Per-query option bag handed to a strategy.
#[derive(Clone)]
pub struct InferenceOptions {
    /// Strategy-specific iteration/round budget; None means the default.
    pub max_iterations: Option<u32>,
    pub debug: bool,
    pub observer: Observer,
    pub session: SessionContext,
    /// Whole-query deadline; enforced by the caller, checked by strategies.
    pub deadline: Duration,
    pub cancel: CancelToken,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            debug: false,
            observer: Observer::noop(),
            session: SessionContext::default(),
            deadline: Duration::from_secs(120),
            cancel: CancelToken::new(),
        }
    }
}

#[async_trait::async_trait]
pub trait Inference: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_query(
        &self,
        query: &str,
        opts: &InferenceOptions,
    ) -> Result<String, CorralError>;

    /// Release per-strategy resources; strategies are stateless between
    /// queries, so the default is a no-op.
    async fn close(&self) {}
}

pub fn build_strategy(kind: StrategyKind, manager: Arc<McpManager>) -> Arc<dyn Inference> {
    match kind {
        StrategyKind::Simple => Arc::new(SimpleStrategy::new(manager)),
        StrategyKind::React => Arc::new(ReactStrategy::new(manager)),
        StrategyKind::Reflection => Arc::new(ReflectionStrategy::new(manager)),
    }
}

// ============================================================================
// Shared strategy plumbing
// ============================================================================

/// Bail out with `Cancelled` once the token fires; strategies call this
/// between iterations and before every LLM or tool call.
pub(crate) fn check_cancelled(opts: &InferenceOptions) -> Result<(), CorralError> {
    if opts.cancel.is_cancelled() {
        Err(CorralError::Cancelled)
    } else {
        Ok(())
    }
}

/// One text completion through the manager's current LLM.
pub(crate) async fn generate_text(
    manager: &McpManager,
    system: Option<&str>,
    prompt: &str,
) -> Result<String, CorralError> {
    let llm = manager.llm().await;
    let response = llm
        .generate(LlmRequest::from_prompt(system, prompt))
        .await
        .map_err(CorralError::from)?;
    Ok(response.text)
}

/// Prefix a prompt with the session window when there is one.
pub(crate) fn with_session(opts: &InferenceOptions, prompt: String) -> String {
    if opts.session.is_empty() {
        prompt
    } else {
        format!("Conversation so far:\n{}\n\n{}", opts.session.render(), prompt)
    }
}

/// Emit the terminal error event and map the failure for the caller.
pub(crate) async fn fail(opts: &InferenceOptions, err: CorralError) -> CorralError {
    opts.observer
        .emit(ObserverEvent::Error {
            message: err.user_message(),
            details: err.to_string(),
        })
        .await;
    err
}
