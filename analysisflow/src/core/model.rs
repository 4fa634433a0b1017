//! Persisted records: analyses, tasks, and their declared inputs/outputs.

use super::{AnalysisState, DataType, TaskState};
use crate::utils::{generate_id, now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// Pointer from an input to the output of an upstream task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyPointer {
    /// The producing task.
    pub upstream_task_id: String,
    /// The producing output name.
    pub output_name: String,
}

impl DependencyPointer {
    /// Creates a new pointer.
    #[must_use]
    pub fn new(upstream_task_id: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            upstream_task_id: upstream_task_id.into(),
            output_name: output_name.into(),
        }
    }
}

/// A declared task input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Input name, as the remote function expects it.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Raw value: a literal, or a reference marker object.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Explicit same-run dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<DependencyPointer>,
}

impl InputSpec {
    /// Creates an input carrying a literal or marker value.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data_type,
            value,
            dependency: None,
        }
    }

    /// Creates an input fed by an upstream task's output.
    #[must_use]
    pub fn depends_on(
        name: impl Into<String>,
        data_type: DataType,
        upstream_task_id: impl Into<String>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            value: serde_json::Value::Null,
            dependency: Some(DependencyPointer::new(upstream_task_id, output_name)),
        }
    }
}

/// A declared task output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Materialized value, set once the task succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl OutputSpec {
    /// Creates a new, not yet materialized output.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            value: None,
        }
    }
}

/// One pipeline step bound to a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub id: String,
    /// Owning analysis.
    pub analysis_id: String,
    /// Tool reference, resolved through the tool catalog.
    pub tool_id: String,
    /// Declared inputs in order.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Declared outputs in order.
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Current state.
    #[serde(default)]
    pub state: TaskState,
    /// Last failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    /// Creates a new READY task with a generated id.
    #[must_use]
    pub fn new(analysis_id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self::with_id(generate_id(), analysis_id, tool_id)
    }

    /// Creates a new READY task with a fixed id.
    #[must_use]
    pub fn with_id(
        id: impl Into<String>,
        analysis_id: impl Into<String>,
        tool_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            analysis_id: analysis_id.into(),
            tool_id: tool_id.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            state: TaskState::Ready,
            error: None,
        }
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, input: InputSpec) -> Self {
        self.inputs.push(input);
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    /// Looks up a declared output.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Looks up a declared input.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

/// One execution of a multi-step pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Analysis id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Task ids in assembly order.
    #[serde(default)]
    pub task_ids: Vec<String>,
    /// Current state.
    #[serde(default)]
    pub state: AnalysisState,
    /// Set once cancellation was requested; never cleared.
    #[serde(default)]
    pub cancelled: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last state change.
    pub updated_at: Timestamp,
}

impl AnalysisRun {
    /// Creates a new READY analysis with a generated id.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::with_id(generate_id(), user_id)
    }

    /// Creates a new READY analysis with a fixed id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = now_utc();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            task_ids: Vec::new(),
            state: AnalysisState::Ready,
            cancelled: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a task id.
    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_ids.push(task_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScalarKind;
    use serde_json::json;

    #[test]
    fn test_task_record_builders() {
        let task = TaskRecord::with_id("t1", "a1", "tool")
            .with_input(InputSpec::new("k", DataType::Scalar(ScalarKind::Int), json!(3)))
            .with_output(OutputSpec::new("out", DataType::File));

        assert_eq!(task.state, TaskState::Ready);
        assert!(task.output("out").is_some());
        assert!(task.input("k").is_some());
        assert!(task.output("missing").is_none());
    }

    #[test]
    fn test_input_spec_deserialize() {
        let raw = json!({
            "name": "table",
            "type": "file",
            "dependency": {"upstream_task_id": "t1", "output_name": "out1"}
        });
        let input: InputSpec = serde_json::from_value(raw).unwrap();

        assert_eq!(input.data_type, DataType::File);
        assert_eq!(input.value, serde_json::Value::Null);
        assert_eq!(input.dependency, Some(DependencyPointer::new("t1", "out1")));
    }

    #[test]
    fn test_analysis_run_defaults() {
        let run = AnalysisRun::new("user-1").with_task("t1").with_task("t2");
        assert_eq!(run.state, AnalysisState::Ready);
        assert_eq!(run.task_ids, vec!["t1".to_string(), "t2".to_string()]);
        assert!(!run.id.is_empty());
    }
}
