//! Mock collaborators for flow tests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::{AnalysisRun, AnalysisState, QueueState, TaskRecord, TaskState};
use crate::errors::FlowError;
use crate::invocation::InvocationPayload;
use crate::ports::{FunctionGateway, InvocationAck};
use crate::queue::QueueEntry;
use crate::store::{InMemoryRecordStore, RecordStore};

/// One call made to a [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInvocation {
    /// Invoked function.
    pub function_id: String,
    /// Callback URL handed to the function.
    pub callback_url: String,
    /// Full payload.
    pub payload: InvocationPayload,
}

/// A gateway that records every invocation.
///
/// Accepts by default. Functions can be configured to be rejected, and the
/// whole gateway can fail a number of calls with a transport error first,
/// either retryable or ambiguous.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<RecordedInvocation>>,
    rejected: DashMap<String, String>,
    transport_failures: AtomicUsize,
    ambiguous_failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingGateway {
    /// Creates a gateway accepting everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every invocation of `function_id` with `reason`.
    #[must_use]
    pub fn rejecting(self, function_id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.rejected.insert(function_id.into(), reason.into());
        self
    }

    /// Fails the next `count` calls with a transport error.
    #[must_use]
    pub fn with_transport_failures(self, count: usize) -> Self {
        self.transport_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fails the next `count` calls as if the request timed out after it
    /// may have reached the function.
    #[must_use]
    pub fn with_ambiguous_failures(self, count: usize) -> Self {
        self.ambiguous_failures.store(count, Ordering::SeqCst);
        self
    }

    /// A gateway whose every call fails with a transport error.
    #[must_use]
    pub fn unreachable() -> Self {
        Self::new().with_transport_failures(usize::MAX)
    }

    /// Returns the accepted and rejected calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedInvocation> {
        self.calls.lock().clone()
    }

    /// Returns the number of recorded calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the number of attempts, including transport failures.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the invoked task ids, in call order.
    #[must_use]
    pub fn invoked_tasks(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|c| c.payload.task_id.clone())
            .collect()
    }

    /// Returns the last payload sent for a task.
    #[must_use]
    pub fn payload_for(&self, task_id: &str) -> Option<InvocationPayload> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.payload.task_id == task_id)
            .map(|c| c.payload.clone())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl FunctionGateway for RecordingGateway {
    async fn invoke_async(
        &self,
        function_id: &str,
        payload: &InvocationPayload,
        callback_url: &str,
    ) -> Result<InvocationAck, FlowError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.transport_failures) {
            return Err(FlowError::RemoteInvocation {
                function_id: function_id.to_string(),
                reason: "connection refused".to_string(),
                retryable: true,
            });
        }
        if Self::take_failure(&self.ambiguous_failures) {
            return Err(FlowError::RemoteInvocation {
                function_id: function_id.to_string(),
                reason: "operation timed out".to_string(),
                retryable: false,
            });
        }
        self.calls.lock().push(RecordedInvocation {
            function_id: function_id.to_string(),
            callback_url: callback_url.to_string(),
            payload: payload.clone(),
        });
        Ok(self
            .rejected
            .get(function_id)
            .map_or(InvocationAck::Accepted, |reason| {
                InvocationAck::Rejected(reason.value().clone())
            }))
    }
}

/// A record store whose queue entry writes fail a number of times.
#[derive(Debug, Default)]
pub struct FailingRecordStore {
    inner: InMemoryRecordStore,
    entry_write_failures: AtomicUsize,
}

impl FailingRecordStore {
    /// Fails the next `count` queue entry writes.
    #[must_use]
    pub fn failing_entry_writes(count: usize) -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            entry_write_failures: AtomicUsize::new(count),
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryRecordStore {
        &self.inner
    }
}

#[async_trait]
impl RecordStore for FailingRecordStore {
    async fn put_analysis(&self, run: AnalysisRun) -> Result<(), FlowError> {
        self.inner.put_analysis(run).await
    }

    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRun, FlowError> {
        self.inner.get_analysis(analysis_id).await
    }

    async fn transition_analysis(
        &self,
        analysis_id: &str,
        from: &[AnalysisState],
        to: AnalysisState,
    ) -> Result<bool, FlowError> {
        self.inner.transition_analysis(analysis_id, from, to).await
    }

    async fn cancel_analysis(
        &self,
        analysis_id: &str,
        from: &[AnalysisState],
        to: AnalysisState,
    ) -> Result<bool, FlowError> {
        self.inner.cancel_analysis(analysis_id, from, to).await
    }

    async fn put_task(&self, task: TaskRecord) -> Result<(), FlowError> {
        self.inner.put_task(task).await
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, FlowError> {
        self.inner.get_task(task_id).await
    }

    async fn tasks_of(&self, analysis_id: &str) -> Result<Vec<TaskRecord>, FlowError> {
        self.inner.tasks_of(analysis_id).await
    }

    async fn transition_task(
        &self,
        task_id: &str,
        from: TaskState,
        to: TaskState,
        error: Option<String>,
    ) -> Result<bool, FlowError> {
        self.inner.transition_task(task_id, from, to, error).await
    }

    async fn set_input_values(
        &self,
        task_id: &str,
        values: &HashMap<String, Value>,
    ) -> Result<(), FlowError> {
        self.inner.set_input_values(task_id, values).await
    }

    async fn set_output_values(
        &self,
        task_id: &str,
        values: Vec<(String, Value)>,
    ) -> Result<(), FlowError> {
        self.inner.set_output_values(task_id, values).await
    }

    async fn put_entry(&self, entry: QueueEntry) -> Result<(), FlowError> {
        let failed = self
            .entry_write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(FlowError::store("queue entry write refused"));
        }
        self.inner.put_entry(entry).await
    }

    async fn get_entry(&self, entry_id: &str) -> Result<QueueEntry, FlowError> {
        self.inner.get_entry(entry_id).await
    }

    async fn transition_entry(
        &self,
        entry_id: &str,
        from: &[QueueState],
        to: QueueState,
        error: Option<String>,
    ) -> Result<bool, FlowError> {
        self.inner.transition_entry(entry_id, from, to, error).await
    }

    async fn record_usage(
        &self,
        entry_id: &str,
        cpu_samples: Vec<f64>,
        memory_samples: Vec<f64>,
        statement_serial: Option<String>,
    ) -> Result<bool, FlowError> {
        self.inner
            .record_usage(entry_id, cpu_samples, memory_samples, statement_serial)
            .await
    }

    async fn open_entries(&self) -> Result<Vec<QueueEntry>, FlowError> {
        self.inner.open_entries().await
    }

    async fn entries_for_task(&self, task_id: &str) -> Result<Vec<QueueEntry>, FlowError> {
        self.inner.entries_for_task(task_id).await
    }
}
