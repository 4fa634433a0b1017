//! Queue entry lifecycle and reconciliation.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::entry::{QueueEntry, QueueEvent};
use super::metering::{Charge, Meter};
use crate::core::{InvocationStatus, QueueState};
use crate::errors::FlowError;
use crate::ledger::{DebitRequest, LinkedEvent, QuotaLedger};
use crate::store::{keys, RecordStore, StatusStore};
use crate::utils::Timestamp;

/// Result of reconciling a queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The entry was metered and charged by this call.
    Metered {
        /// Statement serial.
        serial: String,
        /// The charge.
        charge: Charge,
    },
    /// The entry had already been charged.
    AlreadyMetered {
        /// Statement serial.
        serial: String,
    },
}

impl ReconcileOutcome {
    /// Returns the statement serial.
    #[must_use]
    pub fn serial(&self) -> &str {
        match self {
            Self::Metered { serial, .. } | Self::AlreadyMetered { serial } => serial,
        }
    }
}

/// Records dispatched invocations and charges them once they finish.
pub struct TaskQueue {
    records: Arc<dyn RecordStore>,
    status: Arc<dyn StatusStore>,
    ledger: Arc<dyn QuotaLedger>,
    meter: Meter,
    timeout_seconds: u64,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("meter", &self.meter)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl TaskQueue {
    /// Creates a task queue.
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        status: Arc<dyn StatusStore>,
        ledger: Arc<dyn QuotaLedger>,
        meter: Meter,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            records,
            status,
            ledger,
            meter,
            timeout_seconds,
        }
    }

    /// Records a PENDING entry for a dispatched invocation.
    ///
    /// Never fails: when the entry cannot be persisted a degraded entry
    /// carrying the error is written instead, and if even that fails the
    /// in-memory entry is returned.
    pub async fn enqueue(&self, event: QueueEvent, user_id: &str) -> QueueEntry {
        let entry = QueueEntry::new(user_id, event, self.timeout_seconds);
        let Err(err) = self.records.put_entry(entry.clone()).await else {
            debug!(entry_id = %entry.id, task_id = %entry.event.task_id, "Enqueued invocation");
            return entry;
        };

        warn!(entry_id = %entry.id, error = %err, "Failed to persist queue entry, writing degraded entry");
        let degraded = entry.degraded(err.to_string());
        if let Err(second) = self.records.put_entry(degraded.clone()).await {
            error!(
                entry_id = %degraded.id,
                task_id = %degraded.event.task_id,
                error = %second,
                "Failed to persist degraded queue entry"
            );
        }
        degraded
    }

    /// Loads an entry.
    pub async fn entry(&self, entry_id: &str) -> Result<QueueEntry, FlowError> {
        self.records.get_entry(entry_id).await
    }

    /// Marks a PENDING entry as started.
    ///
    /// Returns `false` if the entry had already moved on.
    pub async fn mark_started(&self, entry_id: &str) -> Result<bool, FlowError> {
        self.records
            .transition_entry(entry_id, &[QueueState::Pending], QueueState::Start, None)
            .await
    }

    /// Marks an open entry as failed.
    ///
    /// Returns `false` if the entry was already terminal.
    pub async fn mark_failed(&self, entry_id: &str, reason: &str) -> Result<bool, FlowError> {
        self.records
            .transition_entry(entry_id, &QueueState::OPEN, QueueState::Failed, Some(reason.to_string()))
            .await
    }

    /// Marks an open entry as timed out.
    ///
    /// Returns `false` if the entry was already terminal, e.g. because its
    /// callback arrived after the entry was listed as overdue.
    pub async fn mark_timed_out(&self, entry_id: &str) -> Result<bool, FlowError> {
        self.records
            .transition_entry(
                entry_id,
                &QueueState::OPEN,
                QueueState::TimedOut,
                Some("invocation timed out".to_string()),
            )
            .await
    }

    /// Returns the open entries whose deadline passed before `now`.
    pub async fn overdue(&self, now: Timestamp) -> Result<Vec<QueueEntry>, FlowError> {
        Ok(self
            .records
            .open_entries()
            .await?
            .into_iter()
            .filter(|e| e.is_overdue(now))
            .collect())
    }

    /// Reads the reported outcome of an invocation, charges it and records the statement.
    ///
    /// Entries already carrying a statement are not charged again. On error
    /// the entry keeps its last persisted state.
    pub async fn reconcile(&self, entry_id: &str) -> Result<ReconcileOutcome, FlowError> {
        let fail = |reason: String| FlowError::reconcile(entry_id, reason);

        let entry = self
            .records
            .get_entry(entry_id)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if let Some(serial) = &entry.statement_serial {
            debug!(entry_id, serial = %serial, "Entry already metered");
            return Ok(ReconcileOutcome::AlreadyMetered {
                serial: serial.clone(),
            });
        }

        let task_id = entry.event.task_id.clone();
        let reported = self
            .status
            .get(&keys::task_status(&task_id))
            .await
            .map_err(|e| fail(e.to_string()))?
            .and_then(|v| v.as_str().and_then(InvocationStatus::parse));
        let cpu_samples = self
            .samples(&keys::task_cpu_samples(&task_id))
            .await
            .map_err(|e| fail(e.to_string()))?;
        let memory_samples = self
            .samples(&keys::task_memory_samples(&task_id))
            .await
            .map_err(|e| fail(e.to_string()))?;

        let target = match reported {
            Some(InvocationStatus::Success) => Some(QueueState::Success),
            Some(InvocationStatus::Error) => Some(QueueState::Failed),
            None => None,
        };
        if let Some(target) = target {
            self.records
                .transition_entry(entry_id, &QueueState::OPEN, target, None)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }
        self.records
            .record_usage(entry_id, cpu_samples.clone(), memory_samples.clone(), None)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let charge = self
            .meter
            .charge(&cpu_samples, &memory_samples)
            .map_err(|e| fail(e.to_string()))?;
        let request = DebitRequest::consumption(
            &entry.user_id,
            charge.total,
            &entry.id,
            LinkedEvent {
                analysis_id: entry.event.analysis_id.clone(),
                task_id: Some(task_id.clone()),
            },
        );
        let outcome = self
            .ledger
            .debit(request)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let serial = outcome.statement().serial.clone();
        let first = self
            .records
            .record_usage(entry_id, cpu_samples, memory_samples, Some(serial.clone()))
            .await
            .map_err(|e| fail(e.to_string()))?;

        if first && outcome.is_recorded() {
            info!(entry_id, task_id = %task_id, total = charge.total, "Metered invocation");
            Ok(ReconcileOutcome::Metered { serial, charge })
        } else {
            Ok(ReconcileOutcome::AlreadyMetered { serial })
        }
    }

    async fn samples(&self, key: &str) -> Result<Vec<f64>, FlowError> {
        Ok(self
            .status
            .list(key)
            .await?
            .iter()
            .filter_map(Value::as_f64)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeteringConfig;
    use crate::ledger::{InMemoryQuotaLedger, QuotaAccount};
    use crate::store::{InMemoryRecordStore, InMemoryStatusStore};
    use crate::testing::FailingRecordStore;
    use crate::utils::now_utc;
    use serde_json::json;

    struct Fixture {
        queue: TaskQueue,
        records: Arc<InMemoryRecordStore>,
        status: Arc<InMemoryStatusStore>,
        ledger: Arc<InMemoryQuotaLedger>,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(InMemoryRecordStore::new());
        let status = Arc::new(InMemoryStatusStore::new());
        let ledger = Arc::new(InMemoryQuotaLedger::with_accounts([QuotaAccount::new("u1", 10.0)]));
        let queue = TaskQueue::new(
            records.clone(),
            status.clone(),
            ledger.clone(),
            Meter::new(MeteringConfig::default()).unwrap(),
            60,
        );
        Fixture {
            queue,
            records,
            status,
            ledger,
        }
    }

    #[tokio::test]
    async fn test_enqueue_persists_pending_entry() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;

        let stored = f.records.get_entry(&entry.id).await.unwrap();
        assert_eq!(stored.state, QueueState::Pending);
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_falls_back_to_degraded_entry() {
        let records = Arc::new(FailingRecordStore::failing_entry_writes(1));
        let queue = TaskQueue::new(
            records.clone(),
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryQuotaLedger::new()),
            Meter::new(MeteringConfig::default()).unwrap(),
            60,
        );

        let entry = queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;
        assert!(entry.error.is_some());
        let stored = records.get_entry(&entry.id).await.unwrap();
        assert_eq!(stored.error, entry.error);
    }

    #[tokio::test]
    async fn test_enqueue_returns_entry_when_everything_fails() {
        let queue = TaskQueue::new(
            Arc::new(FailingRecordStore::failing_entry_writes(usize::MAX)),
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryQuotaLedger::new()),
            Meter::new(MeteringConfig::default()).unwrap(),
            60,
        );
        let entry = queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;
        assert_eq!(entry.event.task_id, "t1");
        assert!(entry.error.is_some());
    }

    #[tokio::test]
    async fn test_mark_transitions() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;

        assert!(f.queue.mark_started(&entry.id).await.unwrap());
        let started = f.queue.entry(&entry.id).await.unwrap();
        assert_eq!(started.state, QueueState::Start);
        assert!(started.started_at.is_some());
        assert!(!f.queue.mark_started(&entry.id).await.unwrap());

        assert!(f.queue.mark_failed(&entry.id, "rejected").await.unwrap());
        let failed = f.queue.entry(&entry.id).await.unwrap();
        assert_eq!(failed.state, QueueState::Failed);
        assert_eq!(failed.error.as_deref(), Some("rejected"));
        assert!(failed.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_timeout_does_not_overwrite_reconciled_entry() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;
        let later = entry.deadline + chrono::Duration::seconds(1);
        let overdue = f.queue.overdue(later).await.unwrap();
        assert_eq!(overdue.len(), 1);

        f.status.set(&keys::task_status("t1"), json!("SUCCESS")).await.unwrap();
        let outcome = f.queue.reconcile(&entry.id).await.unwrap();

        assert!(!f.queue.mark_timed_out(&overdue[0].id).await.unwrap());
        let stored = f.records.get_entry(&entry.id).await.unwrap();
        assert_eq!(stored.state, QueueState::Success);
        assert!(stored.error.is_none());
        assert_eq!(stored.statement_serial.as_deref(), Some(outcome.serial()));
    }

    #[tokio::test]
    async fn test_reconcile_keeps_timed_out_state() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;
        assert!(f.queue.mark_timed_out(&entry.id).await.unwrap());
        f.status.set(&keys::task_status("t1"), json!("SUCCESS")).await.unwrap();

        f.queue.reconcile(&entry.id).await.unwrap();
        let stored = f.records.get_entry(&entry.id).await.unwrap();
        assert_eq!(stored.state, QueueState::TimedOut);
        assert!(stored.is_metered());
    }

    #[tokio::test]
    async fn test_reconcile_meters_reported_samples() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;
        f.status.set(&keys::task_status("t1"), json!("SUCCESS")).await.unwrap();
        f.status.append(&keys::task_cpu_samples("t1"), json!(3600.0)).await.unwrap();
        f.status.append(&keys::task_memory_samples("t1"), json!(0)).await.unwrap();

        let outcome = f.queue.reconcile(&entry.id).await.unwrap();
        let ReconcileOutcome::Metered { charge, .. } = &outcome else {
            panic!("expected a new charge, got {outcome:?}");
        };
        assert!((charge.total - 1.0).abs() < 1e-9);

        let stored = f.records.get_entry(&entry.id).await.unwrap();
        assert_eq!(stored.state, QueueState::Success);
        assert_eq!(stored.cpu_samples, vec![3600.0]);
        assert_eq!(stored.statement_serial.as_deref(), Some(outcome.serial()));
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_double_reconcile_charges_once() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;
        f.status.set(&keys::task_status("t1"), json!("ERROR")).await.unwrap();

        let first = f.queue.reconcile(&entry.id).await.unwrap();
        let second = f.queue.reconcile(&entry.id).await.unwrap();

        assert!(matches!(first, ReconcileOutcome::Metered { .. }));
        assert_eq!(second, ReconcileOutcome::AlreadyMetered { serial: first.serial().to_string() });
        assert_eq!(f.ledger.statements("u1").await.unwrap().len(), 1);
        assert_eq!(f.records.get_entry(&entry.id).await.unwrap().state, QueueState::Failed);
    }

    #[tokio::test]
    async fn test_reconcile_without_samples_charges_minimum() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;

        let outcome = f.queue.reconcile(&entry.id).await.unwrap();
        let ReconcileOutcome::Metered { charge, .. } = outcome else {
            panic!("expected a new charge");
        };
        assert!(charge.total > 0.0);
        assert!((charge.total - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reconcile_error_keeps_entry_state() {
        let f = fixture();
        let mut entry = QueueEntry::new("ghost", QueueEvent::new("a1", "t1"), 60);
        entry.state = QueueState::Start;
        f.records.put_entry(entry.clone()).await.unwrap();

        let err = f.queue.reconcile(&entry.id).await.unwrap_err();
        assert_eq!(err.code(), "QUEUE-RECONCILE");
        let stored = f.records.get_entry(&entry.id).await.unwrap();
        assert_eq!(stored.state, QueueState::Start);
        assert!(stored.statement_serial.is_none());
    }

    #[tokio::test]
    async fn test_overdue() {
        let f = fixture();
        let entry = f.queue.enqueue(QueueEvent::new("a1", "t1"), "u1").await;
        assert!(f.queue.overdue(now_utc()).await.unwrap().is_empty());

        let later = entry.deadline + chrono::Duration::seconds(1);
        assert_eq!(f.queue.overdue(later).await.unwrap().len(), 1);
    }
}
