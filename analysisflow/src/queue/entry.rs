//! Queue entries: one record per dispatched invocation.

use serde::{Deserialize, Serialize};

use crate::core::QueueState;
use crate::utils::{deadline_after, generate_id, now_utc, Timestamp};

/// The task invocation a queue entry stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEvent {
    /// Owning analysis.
    pub analysis_id: String,
    /// Invoked task.
    pub task_id: String,
}

impl QueueEvent {
    /// Creates a new event reference.
    #[must_use]
    pub fn new(analysis_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            task_id: task_id.into(),
        }
    }
}

/// A queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Entry id, also the dedupe key of its ledger debit.
    pub id: String,
    /// User charged for the invocation.
    pub user_id: String,
    /// Invoked task.
    pub event: QueueEvent,
    /// Current state.
    #[serde(default)]
    pub state: QueueState,
    /// CPU-second samples reported by the function.
    #[serde(default)]
    pub cpu_samples: Vec<f64>,
    /// Memory byte samples reported by the function.
    #[serde(default)]
    pub memory_samples: Vec<f64>,
    /// When the invocation was dispatched.
    pub enqueued_at: Timestamp,
    /// When the function reported it started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the invocation reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    /// Deadline for the completion callback.
    pub deadline: Timestamp,
    /// Failure message, also set on degraded entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Serial of the ledger statement, once metered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_serial: Option<String>,
}

impl QueueEntry {
    /// Creates a PENDING entry whose callback is due `timeout_seconds` from now.
    #[must_use]
    pub fn new(user_id: impl Into<String>, event: QueueEvent, timeout_seconds: u64) -> Self {
        let now = now_utc();
        Self {
            id: generate_id(),
            user_id: user_id.into(),
            event,
            state: QueueState::Pending,
            cpu_samples: Vec::new(),
            memory_samples: Vec::new(),
            enqueued_at: now,
            started_at: None,
            ended_at: None,
            deadline: deadline_after(now, timeout_seconds),
            error: None,
            statement_serial: None,
        }
    }

    /// Marks the entry as degraded: it could not be persisted normally.
    #[must_use]
    pub fn degraded(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Returns true once a ledger statement was recorded for this entry.
    #[must_use]
    pub fn is_metered(&self) -> bool {
        self.statement_serial.is_some()
    }

    /// Returns true if the entry is still open past its deadline.
    #[must_use]
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        !self.state.is_terminal() && now > self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_entry_is_pending() {
        let entry = QueueEntry::new("u1", QueueEvent::new("a1", "t1"), 60);
        assert_eq!(entry.state, QueueState::Pending);
        assert!(!entry.is_metered());
        assert!(entry.cpu_samples.is_empty());
        assert_eq!(entry.deadline - entry.enqueued_at, Duration::seconds(60));
    }

    #[test]
    fn test_overdue_only_while_open() {
        let mut entry = QueueEntry::new("u1", QueueEvent::new("a1", "t1"), 1);
        let later = entry.deadline + Duration::seconds(1);
        assert!(entry.is_overdue(later));
        assert!(!entry.is_overdue(entry.enqueued_at));

        entry.state = QueueState::Success;
        assert!(!entry.is_overdue(later));
    }

    #[test]
    fn test_degraded_entry_keeps_message() {
        let entry = QueueEntry::new("u1", QueueEvent::new("a1", "t1"), 1).degraded("db down");
        assert_eq!(entry.error.as_deref(), Some("db down"));
    }
}
