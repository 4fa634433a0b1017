//! Assertions over analysis status snapshots.

use crate::core::{AnalysisState, TaskState};
use crate::flow::AnalysisStatus;

/// Asserts the state of the analysis.
pub fn assert_analysis_state(status: &AnalysisStatus, expected: AnalysisState) {
    assert_eq!(
        status.state, expected,
        "Expected analysis {} to be {}, got {}",
        status.analysis_id, expected, status.state
    );
}

/// Asserts the state of one task.
pub fn assert_task_state(status: &AnalysisStatus, task_id: &str, expected: TaskState) {
    let task = status
        .task(task_id)
        .unwrap_or_else(|| panic!("Task {task_id} is not part of analysis {}", status.analysis_id));
    assert_eq!(
        task.state, expected,
        "Expected task {task_id} to be {expected}, got {} ({:?})",
        task.state, task.error
    );
}

/// Asserts that the event log contains `expected` as a subsequence.
pub fn assert_event_order(status: &AnalysisStatus, expected: &[&str]) {
    let types: Vec<&str> = status.events.iter().map(|e| e.event_type.as_str()).collect();
    let mut remaining = expected.iter().peekable();
    for event_type in &types {
        if remaining.peek() == Some(&event_type) {
            remaining.next();
        }
    }
    assert!(
        remaining.peek().is_none(),
        "Expected events {expected:?} in order, log was {types:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FlowEvent;
    use crate::flow::TaskStatus;

    fn status() -> AnalysisStatus {
        AnalysisStatus {
            analysis_id: "a1".into(),
            state: AnalysisState::Running,
            tasks: vec![TaskStatus {
                task_id: "t1".into(),
                tool_id: "tool".into(),
                state: TaskState::Pending,
                error: None,
            }],
            events: vec![
                FlowEvent::analysis_started("a1", 1),
                FlowEvent::task_dispatched("a1", "t1", "e1"),
            ],
        }
    }

    #[test]
    fn test_assertions_pass() {
        let status = status();
        assert_analysis_state(&status, AnalysisState::Running);
        assert_task_state(&status, "t1", TaskState::Pending);
        assert_event_order(&status, &["analysis.started", "task.dispatched"]);
    }

    #[test]
    #[should_panic(expected = "in order")]
    fn test_event_order_detects_reordering() {
        assert_event_order(&status(), &["task.dispatched", "analysis.started"]);
    }
}
