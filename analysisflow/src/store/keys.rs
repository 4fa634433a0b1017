//! Status store key layout.
//!
//! Every key the engine reads or writes is built here, so the remote
//! functions and any streaming observer agree on one layout.

/// Current state of an analysis.
#[must_use]
pub fn analysis_state(analysis_id: &str) -> String {
    format!("analysis:{analysis_id}:state")
}

/// Event log of an analysis (list).
#[must_use]
pub fn analysis_events(analysis_id: &str) -> String {
    format!("analysis:{analysis_id}:events")
}

/// Current state of a task.
#[must_use]
pub fn task_state(task_id: &str) -> String {
    format!("task:{task_id}:state")
}

/// Terminal status reported by the remote function.
#[must_use]
pub fn task_status(task_id: &str) -> String {
    format!("task:{task_id}:status")
}

/// Event log of a task (list).
#[must_use]
pub fn task_events(task_id: &str) -> String {
    format!("task:{task_id}:events")
}

/// CPU-second samples reported for a task (list).
#[must_use]
pub fn task_cpu_samples(task_id: &str) -> String {
    format!("task:{task_id}:overhead:cpu")
}

/// Memory byte samples reported for a task (list).
#[must_use]
pub fn task_memory_samples(task_id: &str) -> String {
    format!("task:{task_id}:overhead:memory")
}

/// Queue entry recorded for the task's current invocation.
#[must_use]
pub fn task_invocation(task_id: &str) -> String {
    format!("task:{task_id}:invocation")
}

/// In-memory object produced by a task output.
#[must_use]
pub fn memory_object(analysis_id: &str, task_id: &str, output: &str) -> String {
    format!("memory:{analysis_id}:{task_id}:{output}")
}
