//! Persistence of analyses, tasks and queue entries.
//!
//! The three record kinds are independently keyed collections. State changes
//! go through compare-and-set transitions so that concurrent dispatchers and
//! callback handlers cannot move a record backwards or claim it twice.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::{AnalysisRun, AnalysisState, QueueState, TaskRecord, TaskState};
use crate::errors::FlowError;
use crate::queue::QueueEntry;
use crate::utils::now_utc;

/// Store-agnostic record persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces an analysis.
    async fn put_analysis(&self, run: AnalysisRun) -> Result<(), FlowError>;

    /// Loads an analysis.
    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRun, FlowError>;

    /// Moves an analysis to `to` if its current state is one of `from`.
    ///
    /// Returns `false` when the current state did not match.
    async fn transition_analysis(
        &self,
        analysis_id: &str,
        from: &[AnalysisState],
        to: AnalysisState,
    ) -> Result<bool, FlowError>;

    /// Like [`transition_analysis`](Self::transition_analysis), and marks the
    /// run as cancelled in the same step.
    async fn cancel_analysis(
        &self,
        analysis_id: &str,
        from: &[AnalysisState],
        to: AnalysisState,
    ) -> Result<bool, FlowError>;

    /// Inserts or replaces a task.
    async fn put_task(&self, task: TaskRecord) -> Result<(), FlowError>;

    /// Loads a task.
    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, FlowError>;

    /// Loads the tasks of an analysis, in the analysis's task order.
    async fn tasks_of(&self, analysis_id: &str) -> Result<Vec<TaskRecord>, FlowError>;

    /// Moves a task from `from` to `to`, recording `error` when given.
    ///
    /// Returns `false` when the task was not in `from`. Transitions the task
    /// lifecycle forbids are rejected with [`FlowError::InvalidState`].
    async fn transition_task(
        &self,
        task_id: &str,
        from: TaskState,
        to: TaskState,
        error: Option<String>,
    ) -> Result<bool, FlowError>;

    /// Overwrites the values of named inputs of a READY task.
    async fn set_input_values(
        &self,
        task_id: &str,
        values: &HashMap<String, Value>,
    ) -> Result<(), FlowError>;

    /// Materializes output values of a task.
    async fn set_output_values(
        &self,
        task_id: &str,
        values: Vec<(String, Value)>,
    ) -> Result<(), FlowError>;

    /// Inserts or replaces a queue entry.
    async fn put_entry(&self, entry: QueueEntry) -> Result<(), FlowError>;

    /// Loads a queue entry.
    async fn get_entry(&self, entry_id: &str) -> Result<QueueEntry, FlowError>;

    /// Moves a queue entry to `to` if its current state is one of `from`,
    /// recording `error` when given and stamping start/end times.
    ///
    /// Returns `false` when the current state did not match.
    async fn transition_entry(
        &self,
        entry_id: &str,
        from: &[QueueState],
        to: QueueState,
        error: Option<String>,
    ) -> Result<bool, FlowError>;

    /// Stores the resource samples of an entry and, when given, its
    /// statement serial.
    ///
    /// A serial is only written if the entry has none yet; returns `false`
    /// when another serial was already recorded.
    async fn record_usage(
        &self,
        entry_id: &str,
        cpu_samples: Vec<f64>,
        memory_samples: Vec<f64>,
        statement_serial: Option<String>,
    ) -> Result<bool, FlowError>;

    /// Returns all entries that have not reached a terminal state.
    async fn open_entries(&self) -> Result<Vec<QueueEntry>, FlowError>;

    /// Returns all entries recorded for a task, oldest first.
    async fn entries_for_task(&self, task_id: &str) -> Result<Vec<QueueEntry>, FlowError>;
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    analyses: DashMap<String, AnalysisRun>,
    tasks: DashMap<String, TaskRecord>,
    entries: DashMap<String, QueueEntry>,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queue entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put_analysis(&self, run: AnalysisRun) -> Result<(), FlowError> {
        self.analyses.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRun, FlowError> {
        self.analyses
            .get(analysis_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::not_found("analysis", analysis_id))
    }

    async fn transition_analysis(
        &self,
        analysis_id: &str,
        from: &[AnalysisState],
        to: AnalysisState,
    ) -> Result<bool, FlowError> {
        let mut run = self
            .analyses
            .get_mut(analysis_id)
            .ok_or_else(|| FlowError::not_found("analysis", analysis_id))?;
        if !from.contains(&run.state) {
            return Ok(false);
        }
        run.state = to;
        run.updated_at = now_utc();
        Ok(true)
    }

    async fn cancel_analysis(
        &self,
        analysis_id: &str,
        from: &[AnalysisState],
        to: AnalysisState,
    ) -> Result<bool, FlowError> {
        let mut run = self
            .analyses
            .get_mut(analysis_id)
            .ok_or_else(|| FlowError::not_found("analysis", analysis_id))?;
        if !from.contains(&run.state) {
            return Ok(false);
        }
        run.state = to;
        run.cancelled = true;
        run.updated_at = now_utc();
        Ok(true)
    }

    async fn put_task(&self, task: TaskRecord) -> Result<(), FlowError> {
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, FlowError> {
        self.tasks
            .get(task_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| FlowError::not_found("task", task_id))
    }

    async fn tasks_of(&self, analysis_id: &str) -> Result<Vec<TaskRecord>, FlowError> {
        let run = self.get_analysis(analysis_id).await?;
        run.task_ids
            .iter()
            .map(|id| {
                self.tasks
                    .get(id)
                    .map(|t| t.value().clone())
                    .ok_or_else(|| FlowError::not_found("task", id.clone()))
            })
            .collect()
    }

    async fn transition_task(
        &self,
        task_id: &str,
        from: TaskState,
        to: TaskState,
        error: Option<String>,
    ) -> Result<bool, FlowError> {
        if !from.can_transition_to(to) {
            return Err(FlowError::invalid_state(
                "task",
                task_id,
                format!("transition {from} -> {to} is not allowed"),
            ));
        }
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FlowError::not_found("task", task_id))?;
        if task.state != from {
            return Ok(false);
        }
        task.state = to;
        if error.is_some() {
            task.error = error;
        }
        Ok(true)
    }

    async fn set_input_values(
        &self,
        task_id: &str,
        values: &HashMap<String, Value>,
    ) -> Result<(), FlowError> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FlowError::not_found("task", task_id))?;
        if task.state != TaskState::Ready {
            return Err(FlowError::invalid_state(
                "task",
                task_id,
                format!("inputs can only be set while READY, task is {}", task.state),
            ));
        }
        for input in &mut task.inputs {
            if let Some(value) = values.get(&input.name) {
                input.value = value.clone();
            }
        }
        Ok(())
    }

    async fn set_output_values(
        &self,
        task_id: &str,
        values: Vec<(String, Value)>,
    ) -> Result<(), FlowError> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FlowError::not_found("task", task_id))?;
        for (name, value) in values {
            if let Some(output) = task.outputs.iter_mut().find(|o| o.name == name) {
                output.value = Some(value);
            }
        }
        Ok(())
    }

    async fn put_entry(&self, entry: QueueEntry) -> Result<(), FlowError> {
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn get_entry(&self, entry_id: &str) -> Result<QueueEntry, FlowError> {
        self.entries
            .get(entry_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| FlowError::not_found("queue entry", entry_id))
    }

    async fn transition_entry(
        &self,
        entry_id: &str,
        from: &[QueueState],
        to: QueueState,
        error: Option<String>,
    ) -> Result<bool, FlowError> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| FlowError::not_found("queue entry", entry_id))?;
        if !from.contains(&entry.state) {
            return Ok(false);
        }
        entry.state = to;
        if error.is_some() {
            entry.error = error;
        }
        if to == QueueState::Start {
            entry.started_at.get_or_insert_with(now_utc);
        }
        if to.is_terminal() {
            entry.ended_at.get_or_insert_with(now_utc);
        }
        Ok(true)
    }

    async fn record_usage(
        &self,
        entry_id: &str,
        cpu_samples: Vec<f64>,
        memory_samples: Vec<f64>,
        statement_serial: Option<String>,
    ) -> Result<bool, FlowError> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| FlowError::not_found("queue entry", entry_id))?;
        entry.cpu_samples = cpu_samples;
        entry.memory_samples = memory_samples;
        match statement_serial {
            Some(_) if entry.statement_serial.is_some() => Ok(false),
            Some(serial) => {
                entry.statement_serial = Some(serial);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    async fn open_entries(&self) -> Result<Vec<QueueEntry>, FlowError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.state.is_terminal())
            .map(|e| e.value().clone())
            .collect())
    }

    async fn entries_for_task(&self, task_id: &str) -> Result<Vec<QueueEntry>, FlowError> {
        let mut found: Vec<QueueEntry> = self
            .entries
            .iter()
            .filter(|e| e.event.task_id == task_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| e.enqueued_at);
        Ok(found)
    }
}
