//! Completion callbacks and the worker that reconciles them.
//!
//! Remote functions report completion through
//! [`Flow::handle_invocation_callback`], which only enqueues a
//! [`CallbackMessage`]. A single [`CallbackWorker`] drains the channel and
//! processes messages one at a time, so per-entry reconciliation never runs
//! twice concurrently.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::orchestrator::Flow;
use crate::core::InvocationStatus;
use crate::utils::{now_utc, Timestamp};

/// Body a remote function sends on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackBody {
    /// Terminal status.
    pub status: InvocationStatus,
    /// Produced output values, by output name.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    /// CPU-second samples.
    #[serde(default)]
    pub cpu_samples: Vec<f64>,
    /// Memory byte samples.
    #[serde(default)]
    pub memory_samples: Vec<f64>,
    /// Failure message for ERROR callbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackBody {
    /// A SUCCESS body without outputs or samples.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: InvocationStatus::Success,
            outputs: HashMap::new(),
            cpu_samples: Vec::new(),
            memory_samples: Vec::new(),
            error: None,
        }
    }

    /// An ERROR body.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Error,
            error: Some(message.into()),
            ..Self::success()
        }
    }

    /// Adds an output value.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    /// Sets the CPU samples.
    #[must_use]
    pub fn with_cpu_samples(mut self, samples: Vec<f64>) -> Self {
        self.cpu_samples = samples;
        self
    }

    /// Sets the memory samples.
    #[must_use]
    pub fn with_memory_samples(mut self, samples: Vec<f64>) -> Self {
        self.memory_samples = samples;
        self
    }
}

/// A callback waiting to be processed.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackMessage {
    /// Task the callback is for.
    pub task_id: String,
    /// Callback body.
    pub body: CallbackBody,
    /// When the callback arrived.
    pub received_at: Timestamp,
}

impl CallbackMessage {
    /// Creates a message received now.
    #[must_use]
    pub fn new(task_id: impl Into<String>, body: CallbackBody) -> Self {
        Self {
            task_id: task_id.into(),
            body,
            received_at: now_utc(),
        }
    }
}

/// Drains callback messages into [`Flow::process_callback`].
///
/// The worker holds a weak reference to the flow and stops once the flow
/// is dropped or the channel closes.
pub struct CallbackWorker {
    flow: Weak<Flow>,
    receiver: mpsc::UnboundedReceiver<CallbackMessage>,
}

impl std::fmt::Debug for CallbackWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackWorker").finish_non_exhaustive()
    }
}

impl CallbackWorker {
    pub(crate) fn new(flow: Weak<Flow>, receiver: mpsc::UnboundedReceiver<CallbackMessage>) -> Self {
        Self { flow, receiver }
    }

    /// Processes messages until the flow goes away. Returns the number processed.
    pub async fn run(mut self) -> usize {
        let mut processed = 0;
        while let Some(message) = self.receiver.recv().await {
            let Some(flow) = self.flow.upgrade() else {
                break;
            };
            debug!(task_id = %message.task_id, status = %message.body.status, "Processing callback");
            if let Err(e) = flow.process_callback(&message.task_id, message.body).await {
                error!(task_id = %message.task_id, error = %e, "Callback processing failed");
            }
            processed += 1;
        }
        info!(processed, "Callback worker stopped");
        processed
    }

    /// Runs the worker on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_deserialize_with_defaults() {
        let body: CallbackBody = serde_json::from_value(json!({"status": "SUCCESS"})).unwrap();
        assert_eq!(body, CallbackBody::success());
    }

    #[test]
    fn test_body_builders() {
        let body = CallbackBody::error("boom")
            .with_cpu_samples(vec![1.0, 2.0])
            .with_memory_samples(vec![1024.0])
            .with_output("x", json!(1));
        assert_eq!(body.status, InvocationStatus::Error);
        assert_eq!(body.error.as_deref(), Some("boom"));
        assert_eq!(body.cpu_samples.len(), 2);
        assert_eq!(body.outputs["x"], json!(1));
    }

    #[tokio::test]
    async fn test_worker_stops_without_flow() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = CallbackWorker::new(Weak::new(), rx);
        tx.send(CallbackMessage::new("t1", CallbackBody::success())).unwrap();
        assert_eq!(worker.run().await, 0);
    }
}
