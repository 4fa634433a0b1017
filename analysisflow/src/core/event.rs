//! Flow events appended to the status log.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An event emitted by the orchestrator.
///
/// Events are appended to the analysis and task logs in the status store so
/// that a streaming observer can report progress, and mirrored to the
/// configured event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// The event type (e.g., "task.dispatched", "analysis.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The analysis the event belongs to.
    pub analysis_id: String,

    /// The task the event concerns, for task-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The event payload data.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

impl FlowEvent {
    /// Creates a new analysis-level event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, analysis_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            analysis_id: analysis_id.into(),
            task_id: None,
            message: None,
            data: HashMap::new(),
        }
    }

    /// Creates a new task-level event.
    #[must_use]
    pub fn for_task(
        event_type: impl Into<String>,
        analysis_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::new(event_type, analysis_id)
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Creates an "analysis.started" event.
    #[must_use]
    pub fn analysis_started(analysis_id: &str, task_count: usize) -> Self {
        Self::new("analysis.started", analysis_id)
            .add_data("task_count", serde_json::json!(task_count))
    }

    /// Creates a "task.dispatched" event.
    #[must_use]
    pub fn task_dispatched(analysis_id: &str, task_id: &str, entry_id: &str) -> Self {
        Self::for_task("task.dispatched", analysis_id, task_id)
            .add_data("entry_id", serde_json::json!(entry_id))
    }

    /// Creates a "task.succeeded" event.
    #[must_use]
    pub fn task_succeeded(analysis_id: &str, task_id: &str) -> Self {
        Self::for_task("task.succeeded", analysis_id, task_id)
    }

    /// Creates a "task.failed" event.
    #[must_use]
    pub fn task_failed(analysis_id: &str, task_id: &str, error: &str) -> Self {
        Self::for_task("task.failed", analysis_id, task_id).with_message(error)
    }
}
