//! Publishes state changes and events to the status store.

use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use crate::core::{AnalysisState, FlowEvent, TaskState};
use crate::errors::FlowError;
use crate::events::EventSink;
use crate::store::{keys, StatusStore};

/// Writes analysis/task states and event logs for streaming observers.
///
/// Publishing never fails the caller: a status store error is logged and
/// the event is still handed to the sink.
pub struct StatusPublisher {
    status: Arc<dyn StatusStore>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher").finish_non_exhaustive()
    }
}

impl StatusPublisher {
    /// Creates a publisher.
    #[must_use]
    pub fn new(status: Arc<dyn StatusStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { status, sink }
    }

    /// Publishes the state of an analysis.
    pub async fn analysis_state(&self, analysis_id: &str, state: AnalysisState) {
        let key = keys::analysis_state(analysis_id);
        if let Err(e) = self.status.set(&key, Value::String(state.to_string())).await {
            error!(analysis_id, %state, error = %e, "Failed to publish analysis state");
        }
    }

    /// Publishes the state of a task.
    pub async fn task_state(&self, task_id: &str, state: TaskState) {
        let key = keys::task_state(task_id);
        if let Err(e) = self.status.set(&key, Value::String(state.to_string())).await {
            error!(task_id, %state, error = %e, "Failed to publish task state");
        }
    }

    /// Appends an event to the analysis log, and to the task log for task events.
    pub async fn publish(&self, event: FlowEvent) {
        match serde_json::to_value(&event) {
            Ok(value) => {
                if let Some(task_id) = &event.task_id {
                    self.append(&keys::task_events(task_id), value.clone()).await;
                }
                self.append(&keys::analysis_events(&event.analysis_id), value)
                    .await;
            }
            Err(e) => error!(event_type = %event.event_type, error = %e, "Failed to encode event"),
        }
        self.sink.emit(&event).await;
    }

    /// Reads the event log of an analysis.
    pub async fn events(&self, analysis_id: &str) -> Result<Vec<FlowEvent>, FlowError> {
        self.status
            .list(&keys::analysis_events(analysis_id))
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(FlowError::from))
            .collect()
    }

    async fn append(&self, key: &str, value: Value) {
        if let Err(e) = self.status.append(key, value).await {
            error!(key, error = %e, "Failed to append event");
        }
    }
}
