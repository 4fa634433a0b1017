//! Lifecycle state enums for analyses, tasks and queue entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisState {
    /// Assembled, not started yet.
    Ready,
    /// Tasks are being dispatched.
    Running,
    /// Cancellation requested; no new dispatches, pending tasks drain.
    Cancelling,
    /// At least one task failed, was cancelled or timed out.
    Incompleted,
    /// Every task succeeded.
    Completed,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self::Ready
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Cancelling => write!(f, "CANCELLING"),
            Self::Incompleted => write!(f, "INCOMPLETED"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl AnalysisState {
    /// Returns true if the run may still dispatch newly-ready tasks.
    ///
    /// An INCOMPLETED run keeps dispatching independent branches. A
    /// cancelled run is INCOMPLETED too, so callers must also check
    /// [`AnalysisRun::cancelled`](crate::core::AnalysisRun::cancelled).
    #[must_use]
    pub fn accepts_dispatch(&self) -> bool {
        matches!(self, Self::Running | Self::Incompleted)
    }
}

/// The execution state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for its producers or for dispatch.
    Ready,
    /// Dispatched, awaiting the completion callback.
    Pending,
    /// Completed successfully.
    Success,
    /// Failed.
    Error,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Ready
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Pending => write!(f, "PENDING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl TaskState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    ///
    /// Transitions only go forward: READY -> PENDING -> {SUCCESS, ERROR},
    /// plus READY -> ERROR when a payload cannot be built.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Ready, Self::Pending)
                | (Self::Ready, Self::Error)
                | (Self::Pending, Self::Success)
                | (Self::Pending, Self::Error)
        )
    }
}

/// The state of a queue entry (one dispatched invocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    /// Recorded, not yet reported as started.
    Pending,
    /// The remote function reported it started.
    Start,
    /// The invocation finished successfully.
    Success,
    /// The invocation failed or was rejected.
    Failed,
    /// No callback arrived before the deadline.
    TimedOut,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Start => write!(f, "START"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

impl QueueState {
    /// States an entry can still leave.
    pub const OPEN: [Self; 2] = [Self::Pending, Self::Start];

    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::TimedOut)
    }
}

/// Terminal status reported by a remote function in its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationStatus {
    /// The function finished and produced its outputs.
    Success,
    /// The function failed.
    Error,
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl InvocationStatus {
    /// Parses the status string stored in the status store.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SUCCESS" => Some(Self::Success),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_state_display() {
        assert_eq!(AnalysisState::Ready.to_string(), "READY");
        assert_eq!(AnalysisState::Incompleted.to_string(), "INCOMPLETED");
        assert_eq!(AnalysisState::Cancelling.to_string(), "CANCELLING");
    }

    #[test]
    fn test_analysis_state_accepts_dispatch() {
        assert!(AnalysisState::Running.accepts_dispatch());
        assert!(AnalysisState::Incompleted.accepts_dispatch());
        assert!(!AnalysisState::Cancelling.accepts_dispatch());
        assert!(!AnalysisState::Completed.accepts_dispatch());
        assert!(!AnalysisState::Ready.accepts_dispatch());
    }

    #[test]
    fn test_task_transitions_are_monotonic() {
        assert!(TaskState::Ready.can_transition_to(TaskState::Pending));
        assert!(TaskState::Pending.can_transition_to(TaskState::Success));
        assert!(TaskState::Pending.can_transition_to(TaskState::Error));
        assert!(!TaskState::Success.can_transition_to(TaskState::Error));
        assert!(!TaskState::Error.can_transition_to(TaskState::Pending));
        assert!(!TaskState::Ready.can_transition_to(TaskState::Success));
    }

    #[test]
    fn test_queue_state_serialize() {
        let json = serde_json::to_string(&QueueState::TimedOut).unwrap();
        assert_eq!(json, r#""TIMED_OUT""#);

        let parsed: QueueState = serde_json::from_str(r#""START""#).unwrap();
        assert_eq!(parsed, QueueState::Start);
    }

    #[test]
    fn test_invocation_status_parse() {
        assert_eq!(InvocationStatus::parse("SUCCESS"), Some(InvocationStatus::Success));
        assert_eq!(InvocationStatus::parse("ERROR"), Some(InvocationStatus::Error));
        assert_eq!(InvocationStatus::parse("running"), None);
    }
}
