//! Push-based progress channel between inference strategies and the REPL.
//!
//! Events travel over a bounded mpsc channel. Low-priority events (thoughts,
//! partial responses) are dropped when the consumer lags; terminal events
//! always go through.

use crate::tools::ToolExecutionResult;
use serde_json::Value;
use tokio::sync::mpsc;

/// Progress notification emitted by a strategy, in source order per query:
/// inference-start, (thought | tool-discovery | tool-selection |
/// tool-execution | partial-response)*, then inference-complete or error.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    InferenceStart { strategy: String },
    Thought { text: String },
    ToolDiscovery { names: Vec<String> },
    ToolSelection { name: String, args: Value },
    ToolExecution { name: String, result: ToolExecutionResult },
    PartialResponse { text: String },
    InferenceComplete { text: String },
    Error { message: String, details: String },
}

impl ObserverEvent {
    /// Low-priority events may be dropped under backpressure.
    fn is_droppable(&self) -> bool {
        matches!(
            self,
            ObserverEvent::Thought { .. } | ObserverEvent::PartialResponse { .. }
        )
    }
}

/// Sending half handed to strategies. Cloneable; a no-op observer is
/// available for headless use.
#[derive(Clone)]
pub struct Observer {
    tx: Option<mpsc::Sender<ObserverEvent>>,
}

impl Observer {
    /// Create an observer with a bounded channel of the given capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ObserverEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// An observer that discards every event.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    /// Emit one event. Droppable events use `try_send` and are discarded
    /// when the channel is full; everything else awaits channel space.
    pub async fn emit(&self, event: ObserverEvent) {
        let Some(tx) = &self.tx else { return };
        if event.is_droppable() {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    tracing::debug!("observer channel full, dropping {:?}", kind_name(&ev));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        } else if tx.send(event).await.is_err() {
            tracing::debug!("observer receiver dropped");
        }
    }
}

fn kind_name(event: &ObserverEvent) -> &'static str {
    match event {
        ObserverEvent::InferenceStart { .. } => "inference-start",
        ObserverEvent::Thought { .. } => "thought",
        ObserverEvent::ToolDiscovery { .. } => "tool-discovery",
        ObserverEvent::ToolSelection { .. } => "tool-selection",
        ObserverEvent::ToolExecution { .. } => "tool-execution",
        ObserverEvent::PartialResponse { .. } => "partial-response",
        ObserverEvent::InferenceComplete { .. } => "inference-complete",
        ObserverEvent::Error { .. } => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (obs, mut rx) = Observer::channel(8);
        obs.emit(ObserverEvent::InferenceStart {
            strategy: "simple".into(),
        })
        .await;
        obs.emit(ObserverEvent::InferenceComplete { text: "done".into() })
            .await;
        drop(obs);

        assert!(matches!(
            rx.recv().await,
            Some(ObserverEvent::InferenceStart { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ObserverEvent::InferenceComplete { .. })
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_droppable_events_dropped_when_full() {
        let (obs, mut rx) = Observer::channel(1);
        obs.emit(ObserverEvent::Thought { text: "a".into() }).await;
        // Channel is full; the second thought is silently dropped.
        obs.emit(ObserverEvent::Thought { text: "b".into() }).await;
        drop(obs);

        let first = rx.recv().await;
        assert!(matches!(first, Some(ObserverEvent::Thought { text }) if text == "a"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_noop_observer_is_silent() {
        let obs = Observer::noop();
        obs.emit(ObserverEvent::InferenceComplete { text: "x".into() })
            .await;
    }
}
