//! Error types for the analysisflow engine.
//!
//! Errors are split into assembly-time failures (graph shape, admission,
//! missing tool metadata) that reject an analysis start synchronously, and
//! task-local failures that are recorded on the task and its queue entry
//! without disturbing sibling tasks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for analysisflow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The task dependency pointers form a cycle.
    #[error("{0}")]
    GraphCycle(#[from] GraphCycleError),

    /// A dependency pointer names a task or output outside the run.
    #[error("{0}")]
    DanglingReference(#[from] DanglingReferenceError),

    /// A task was asked to run before its producer succeeded.
    #[error("{0}")]
    UnresolvedDependency(#[from] UnresolvedDependencyError),

    /// The user has no quota or storage headroom left.
    #[error("Admission denied for user '{user_id}': {reason}")]
    AdmissionDenied {
        /// The user that was refused.
        user_id: String,
        /// Why admission was refused.
        reason: String,
    },

    /// A blob could not be staged into the run bucket.
    #[error("Staging failed for '{source_path}' -> '{destination}': {reason}")]
    Staging {
        /// Source `bucket/object` path.
        source_path: String,
        /// Destination `bucket/object` path.
        destination: String,
        /// The underlying failure.
        reason: String,
    },

    /// The function gateway rejected or failed the invocation.
    #[error("Remote invocation of '{function_id}' failed: {reason}")]
    RemoteInvocation {
        /// The function that was invoked.
        function_id: String,
        /// The rejection or transport failure.
        reason: String,
        /// True when the function certainly did not receive the request,
        /// so sending it again cannot start a second run.
        retryable: bool,
    },

    /// A completion callback could not be reconciled.
    #[error("Reconcile failed for queue entry '{entry_id}': {reason}")]
    Reconcile {
        /// The queue entry being reconciled.
        entry_id: String,
        /// The underlying failure.
        reason: String,
    },

    /// The tool catalog has no metadata for a task's tool.
    #[error("Tool not found: {tool_id}")]
    ToolNotFound {
        /// The missing tool.
        tool_id: String,
    },

    /// A persisted record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The record kind (e.g. "analysis", "task").
        kind: &'static str,
        /// The record id.
        id: String,
    },

    /// The requested operation is not valid in the record's current state.
    #[error("Invalid state for {kind} '{id}': {message}")]
    InvalidState {
        /// The record kind.
        kind: &'static str,
        /// The record id.
        id: String,
        /// What was wrong.
        message: String,
    },

    /// A backing store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn invalid_state(
        kind: &'static str,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            kind,
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates an admission denied error.
    #[must_use]
    pub fn admission_denied(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AdmissionDenied {
            user_id: user_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a reconcile error.
    #[must_use]
    pub fn reconcile(entry_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reconcile {
            entry_id: entry_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that only affect a single task.
    ///
    /// Task-local errors are recorded on the task and never abort sibling
    /// dispatches or the whole analysis start.
    #[must_use]
    pub fn is_task_local(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedDependency(_) | Self::Staging { .. } | Self::RemoteInvocation { .. }
        )
    }

    /// Returns true if the failed call may safely be sent again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteInvocation { retryable: true, .. })
    }

    /// Returns the stable error code used in status logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::GraphCycle(_) => "GRAPH-CYCLE",
            Self::DanglingReference(_) => "GRAPH-DANGLING",
            Self::UnresolvedDependency(_) => "TASK-UNRESOLVED",
            Self::AdmissionDenied { .. } => "ADMISSION-DENIED",
            Self::Staging { .. } => "TASK-STAGING",
            Self::RemoteInvocation { .. } => "TASK-INVOKE",
            Self::Reconcile { .. } => "QUEUE-RECONCILE",
            Self::ToolNotFound { .. } => "TOOL-NOT-FOUND",
            Self::NotFound { .. } => "NOT-FOUND",
            Self::InvalidState { .. } => "INVALID-STATE",
            Self::Store(_) => "STORE",
            Self::Config(_) => "CONFIG",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Io(_) => "IO",
        }
    }
}

/// Metadata about a graph error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphErrorInfo {
    /// Error code (e.g., "GRAPH-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl GraphErrorInfo {
    /// Creates a new graph error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when the task graph of an analysis contains a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in analysis '{analysis_id}': tasks {} cannot be ordered", stuck_tasks.join(", "))]
pub struct GraphCycleError {
    /// The analysis whose graph was being built.
    pub analysis_id: String,
    /// Tasks left with unresolved in-degree after the topological sort.
    pub stuck_tasks: Vec<String>,
    /// Diagnostic info.
    pub error_info: GraphErrorInfo,
}

impl GraphCycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(analysis_id: impl Into<String>, stuck_tasks: Vec<String>) -> Self {
        let analysis_id = analysis_id.into();
        let info = GraphErrorInfo::new(
            "GRAPH-CYCLE",
            format!("Analysis contains a dependency cycle among: {}", stuck_tasks.join(", ")),
        )
        .with_fix_hint("Remove one of the input dependencies in the cycle to break it.")
        .with_context_entry("analysis_id", analysis_id.clone());

        Self {
            analysis_id,
            stuck_tasks,
            error_info: info,
        }
    }
}

/// Error raised when an input points at a task or output that does not exist in the run.
#[derive(Debug, Clone, Error)]
#[error("Task '{task_id}' input '{input}' references missing {missing}")]
pub struct DanglingReferenceError {
    /// The consuming task.
    pub task_id: String,
    /// The consuming input name.
    pub input: String,
    /// Description of what is missing (task or output).
    pub missing: String,
    /// Diagnostic info.
    pub error_info: GraphErrorInfo,
}

impl DanglingReferenceError {
    /// Creates an error for a pointer to an unknown task.
    #[must_use]
    pub fn missing_task(
        task_id: impl Into<String>,
        input: impl Into<String>,
        upstream_task_id: &str,
    ) -> Self {
        Self::build(task_id.into(), input.into(), format!("task '{upstream_task_id}'"))
    }

    /// Creates an error for a pointer to an undeclared output.
    #[must_use]
    pub fn missing_output(
        task_id: impl Into<String>,
        input: impl Into<String>,
        upstream_task_id: &str,
        output: &str,
    ) -> Self {
        Self::build(
            task_id.into(),
            input.into(),
            format!("output '{output}' of task '{upstream_task_id}'"),
        )
    }

    fn build(task_id: String, input: String, missing: String) -> Self {
        let info = GraphErrorInfo::new("GRAPH-DANGLING", format!("Dependency on {missing} not found"))
            .with_fix_hint("Ensure the upstream task belongs to the same analysis and declares the output.")
            .with_context_entry("task_id", task_id.clone())
            .with_context_entry("input", input.clone());

        Self {
            task_id,
            input,
            missing,
            error_info: info,
        }
    }
}

/// Error raised when a task's producer has not reached SUCCESS.
#[derive(Debug, Clone, Error)]
#[error("Task '{task_id}' input '{input}' depends on '{upstream_task_id}.{output}' which is not materialized")]
pub struct UnresolvedDependencyError {
    /// The consuming task.
    pub task_id: String,
    /// The consuming input.
    pub input: String,
    /// The producing task.
    pub upstream_task_id: String,
    /// The producing output.
    pub output: String,
}

impl UnresolvedDependencyError {
    /// Creates a new unresolved dependency error.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        input: impl Into<String>,
        upstream_task_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            input: input.into(),
            upstream_task_id: upstream_task_id.into(),
            output: output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_cycle_error_message() {
        let err = GraphCycleError::new("a1", vec!["t1".to_string(), "t2".to_string()]);

        assert!(err.to_string().contains("t1, t2"));
        assert_eq!(err.error_info.code, "GRAPH-CYCLE");
        assert_eq!(err.error_info.context.get("analysis_id"), Some(&"a1".to_string()));
    }

    #[test]
    fn test_dangling_reference_variants() {
        let task = DanglingReferenceError::missing_task("t2", "in1", "ghost");
        assert!(task.to_string().contains("task 'ghost'"));

        let output = DanglingReferenceError::missing_output("t2", "in1", "t1", "nope");
        assert!(output.to_string().contains("output 'nope' of task 't1'"));
        assert_eq!(output.error_info.code, "GRAPH-DANGLING");
    }

    #[test]
    fn test_task_local_classification() {
        let unresolved: FlowError = UnresolvedDependencyError::new("t2", "in", "t1", "out").into();
        assert!(unresolved.is_task_local());

        let cycle: FlowError = GraphCycleError::new("a", vec![]).into();
        assert!(!cycle.is_task_local());

        assert!(!FlowError::admission_denied("u", "no quota").is_task_local());
    }

    #[test]
    fn test_only_undelivered_invocations_are_retryable() {
        let refused = FlowError::RemoteInvocation {
            function_id: "f1".into(),
            reason: "connection refused".into(),
            retryable: true,
        };
        let timed_out = FlowError::RemoteInvocation {
            function_id: "f1".into(),
            reason: "operation timed out".into(),
            retryable: false,
        };
        assert!(refused.is_retryable());
        assert!(!timed_out.is_retryable());
        assert!(timed_out.is_task_local());
        assert!(!FlowError::store("boom").is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(FlowError::store("boom").code(), "STORE");
        assert_eq!(FlowError::not_found("task", "t1").code(), "NOT-FOUND");
        assert_eq!(FlowError::not_found("task", "t1").to_string(), "task not found: t1");
    }
}
