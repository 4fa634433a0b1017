//! The pipeline orchestrator.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::callback::{CallbackBody, CallbackMessage, CallbackWorker};
use super::publisher::StatusPublisher;
use super::retry::with_retry;
use super::timeout::TimeoutSweeper;
use crate::config::FlowConfig;
use crate::core::{
    AnalysisRun, AnalysisState, FlowEvent, InvocationStatus, ReferenceMarker, TaskRecord,
    TaskState,
};
use crate::errors::FlowError;
use crate::graph::{DependencyGraph, DependencyGraphBuilder};
use crate::invocation::{output_location, InvocationBuilder, InvocationPayload};
use crate::ports::{AdmissionCheck, FunctionGateway, InvocationAck, ToolCatalog};
use crate::queue::{QueueEvent, TaskQueue};
use crate::store::{keys, RecordStore, StatusStore};
use crate::utils::Timestamp;

/// Literal inputs supplied at start, by task id then input name.
pub type LiteralInputs = HashMap<String, HashMap<String, Value>>;

/// What [`Flow::start_analysis`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReceipt {
    /// The started analysis.
    pub analysis_id: String,
    /// All tasks in dispatch order.
    pub execution_order: Vec<String>,
    /// Tasks grouped by dependency level.
    pub ready_sets: Vec<Vec<String>>,
    /// Tasks accepted by the gateway during start.
    pub dispatched: Vec<String>,
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The gateway accepted the invocation.
    Dispatched {
        /// Queue entry recorded for the invocation.
        entry_id: String,
    },
    /// The task was not dispatchable (already claimed, producers pending,
    /// or the run no longer dispatches).
    Skipped,
    /// The task failed during dispatch and is now ERROR.
    Failed {
        /// Recorded failure message.
        reason: String,
    },
}

/// Result of processing one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The callback moved the task to the given state.
    Applied(TaskState),
    /// The task was already terminal; only reconciliation ran.
    Duplicate(TaskState),
}

/// Current state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task id.
    pub task_id: String,
    /// Tool the task runs.
    pub tool_id: String,
    /// Current state.
    pub state: TaskState,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot returned by [`Flow::get_analysis_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStatus {
    /// Analysis id.
    pub analysis_id: String,
    /// Current state.
    pub state: AnalysisState,
    /// Tasks in assembly order.
    pub tasks: Vec<TaskStatus>,
    /// Event log, oldest first.
    pub events: Vec<FlowEvent>,
}

impl AnalysisStatus {
    /// Looks up one task.
    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<&TaskStatus> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Returns true once the run reached COMPLETED or INCOMPLETED with
    /// nothing left in flight.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.state, AnalysisState::Completed | AnalysisState::Incompleted)
            && self.tasks.iter().all(|t| t.state != TaskState::Pending)
    }
}

/// Dispatches analyses to remote functions and follows them to completion.
///
/// Create one with [`Flow::builder`](crate::flow::FlowBuilder).
pub struct Flow {
    pub(super) config: FlowConfig,
    pub(super) records: Arc<dyn RecordStore>,
    pub(super) status: Arc<dyn StatusStore>,
    pub(super) catalog: Arc<dyn ToolCatalog>,
    pub(super) admission: Arc<dyn AdmissionCheck>,
    pub(super) gateway: Arc<dyn FunctionGateway>,
    pub(super) publisher: StatusPublisher,
    pub(super) queue: TaskQueue,
    pub(super) invocations: InvocationBuilder,
    pub(super) graphs: DashMap<String, Arc<DependencyGraph>>,
    pub(super) callbacks: mpsc::UnboundedSender<CallbackMessage>,
    pub(super) callback_receiver: Mutex<Option<mpsc::UnboundedReceiver<CallbackMessage>>>,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("config", &self.config)
            .field("cached_graphs", &self.graphs.len())
            .finish_non_exhaustive()
    }
}

impl Flow {
    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Returns the task queue.
    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Starts an analysis.
    ///
    /// Ownership, admission, tool metadata and graph shape are checked before
    /// anything is written; a failure leaves no trace. The first ready-set is
    /// then dispatched concurrently.
    pub async fn start_analysis(
        &self,
        analysis_id: &str,
        literal_inputs: &LiteralInputs,
        user_id: &str,
    ) -> Result<StartReceipt, FlowError> {
        let run = self.records.get_analysis(analysis_id).await?;
        ensure_owner(&run, user_id)?;
        if run.state != AnalysisState::Ready {
            return Err(FlowError::invalid_state(
                "analysis",
                analysis_id,
                format!("cannot start an analysis in state {}", run.state),
            ));
        }
        self.admission.admit(user_id).await?;

        let mut tasks = self.records.tasks_of(analysis_id).await?;
        for task in &tasks {
            if self.catalog.get_tool(&task.tool_id).await?.is_none() {
                return Err(FlowError::ToolNotFound {
                    tool_id: task.tool_id.clone(),
                });
            }
        }
        apply_literals(analysis_id, &mut tasks, literal_inputs)?;
        let graph = Arc::new(DependencyGraphBuilder::build(analysis_id, &tasks)?);

        if !self
            .records
            .transition_analysis(analysis_id, &[AnalysisState::Ready], AnalysisState::Running)
            .await?
        {
            return Err(FlowError::invalid_state("analysis", analysis_id, "analysis was started concurrently"));
        }
        for (task_id, values) in literal_inputs {
            if let Err(e) = self.records.set_input_values(task_id, values).await {
                error!(analysis_id, task_id = %task_id, error = %e, "Failed to store literal inputs");
                self.mark_incompleted(analysis_id).await?;
                return Err(e);
            }
        }
        self.graphs.insert(analysis_id.to_string(), graph.clone());

        info!(analysis_id, user_id, tasks = graph.task_count(), "Analysis started");
        self.publisher
            .analysis_state(analysis_id, AnalysisState::Running)
            .await;
        self.publisher
            .publish(FlowEvent::analysis_started(analysis_id, graph.task_count()))
            .await;

        let states: HashMap<String, TaskState> =
            tasks.iter().map(|t| (t.id.clone(), t.state)).collect();
        let dispatched = self
            .dispatch_all(analysis_id, graph.ready_tasks(&states))
            .await;
        if graph.is_empty() {
            self.finish_if_done(analysis_id).await?;
        }

        Ok(StartReceipt {
            analysis_id: analysis_id.to_string(),
            execution_order: graph.execution_order().to_vec(),
            ready_sets: graph.ready_sets().to_vec(),
            dispatched,
        })
    }

    /// Dispatches one task.
    ///
    /// The task is claimed READY -> PENDING first, so concurrent callers
    /// dispatch it at most once. Payload, staging and gateway failures are
    /// recorded on the task and returned as [`DispatchOutcome::Failed`].
    pub async fn dispatch_task(
        &self,
        analysis_id: &str,
        task_id: &str,
    ) -> Result<DispatchOutcome, FlowError> {
        let run = self.records.get_analysis(analysis_id).await?;
        if run.cancelled || !run.state.accepts_dispatch() {
            debug!(analysis_id, task_id, state = %run.state, cancelled = run.cancelled, "Run does not dispatch");
            return Ok(DispatchOutcome::Skipped);
        }
        let graph = self.graph_for(analysis_id).await?;
        if !graph.contains(task_id) {
            return Err(FlowError::not_found("task", task_id));
        }
        let task = self.records.get_task(task_id).await?;
        if task.state != TaskState::Ready {
            return Ok(DispatchOutcome::Skipped);
        }

        let mut producers = HashMap::new();
        for producer_id in graph.producers_of(task_id) {
            let producer = self.records.get_task(producer_id).await?;
            if producer.state != TaskState::Success {
                return Ok(DispatchOutcome::Skipped);
            }
            producers.insert(producer_id.clone(), producer);
        }

        if !self
            .records
            .transition_task(task_id, TaskState::Ready, TaskState::Pending, None)
            .await?
        {
            return Ok(DispatchOutcome::Skipped);
        }
        self.publisher.task_state(task_id, TaskState::Pending).await;

        // A cancellation that landed after the run was read must not invoke.
        if self.records.get_analysis(analysis_id).await?.cancelled {
            let reason = "analysis was cancelled".to_string();
            self.fail_task(analysis_id, task_id, &reason).await?;
            return Ok(DispatchOutcome::Failed { reason });
        }

        let payload = match self.prepare(&run, &task, &graph, &producers).await {
            Ok(payload) => payload,
            Err(e) => {
                if e.is_task_local() {
                    warn!(analysis_id, task_id, code = e.code(), error = %e, "Payload could not be built");
                } else {
                    error!(analysis_id, task_id, code = e.code(), error = %e, "Payload could not be built");
                }
                let reason = e.to_string();
                self.fail_task(analysis_id, task_id, &reason).await?;
                return Ok(DispatchOutcome::Failed { reason });
            }
        };

        let entry = self
            .queue
            .enqueue(QueueEvent::new(analysis_id, task_id), &run.user_id)
            .await;
        if let Err(e) = self
            .status
            .set(&keys::task_invocation(task_id), json!(entry.id))
            .await
        {
            error!(task_id, entry_id = %entry.id, error = %e, "Failed to record invocation");
        }
        self.publisher
            .publish(FlowEvent::task_dispatched(analysis_id, task_id, &entry.id))
            .await;

        let reason = match self.invoke(&payload).await {
            Ok(InvocationAck::Accepted) => {
                info!(analysis_id, task_id, entry_id = %entry.id, function_id = %payload.function_id, "Task dispatched");
                return Ok(DispatchOutcome::Dispatched { entry_id: entry.id });
            }
            Ok(InvocationAck::Rejected(reason)) => FlowError::RemoteInvocation {
                function_id: payload.function_id.clone(),
                reason,
                retryable: false,
            }
            .to_string(),
            Err(e) => e.to_string(),
        };

        warn!(analysis_id, task_id, reason = %reason, "Invocation failed");
        if let Err(e) = self.queue.mark_failed(&entry.id, &reason).await {
            error!(entry_id = %entry.id, error = %e, "Failed to mark queue entry failed");
        }
        self.fail_task(analysis_id, task_id, &reason).await?;
        Ok(DispatchOutcome::Failed { reason })
    }

    /// Hands a completion callback to the callback worker.
    pub fn handle_invocation_callback(
        &self,
        task_id: &str,
        body: CallbackBody,
    ) -> Result<(), FlowError> {
        self.callbacks
            .send(CallbackMessage::new(task_id, body))
            .map_err(|_| FlowError::store("callback worker has stopped"))
    }

    /// Applies a completion callback.
    ///
    /// Callbacks for tasks that are already terminal are acknowledged and
    /// only reconcile the queue entry.
    pub async fn process_callback(
        &self,
        task_id: &str,
        body: CallbackBody,
    ) -> Result<CallbackOutcome, FlowError> {
        let task = self.records.get_task(task_id).await?;
        match task.state {
            TaskState::Ready => {
                return Err(FlowError::invalid_state(
                    "task",
                    task_id,
                    "callback received for a task that was never dispatched",
                ));
            }
            TaskState::Success | TaskState::Error => {
                info!(task_id, state = %task.state, "Duplicate callback");
                self.reconcile_task(task_id).await;
                return Ok(CallbackOutcome::Duplicate(task.state));
            }
            TaskState::Pending => {}
        }

        self.record_report(task_id, &body).await?;
        let state = match body.status {
            InvocationStatus::Success => self.complete_task(&task, &body).await?,
            InvocationStatus::Error => {
                let reason = body
                    .error
                    .clone()
                    .unwrap_or_else(|| "remote function reported an error".to_string());
                self.fail_task(&task.analysis_id, task_id, &reason).await?;
                TaskState::Error
            }
        };
        self.reconcile_task(task_id).await;
        Ok(CallbackOutcome::Applied(state))
    }

    /// Requests cancellation of an analysis.
    ///
    /// The run is flagged as cancelled and never dispatches again; once no
    /// task is PENDING it becomes INCOMPLETED. Returns the state after the
    /// request.
    pub async fn cancel_analysis(
        &self,
        analysis_id: &str,
        user_id: &str,
    ) -> Result<AnalysisState, FlowError> {
        let run = self.records.get_analysis(analysis_id).await?;
        ensure_owner(&run, user_id)?;
        match run.state {
            AnalysisState::Completed => {
                return Err(FlowError::invalid_state("analysis", analysis_id, "analysis already completed"));
            }
            AnalysisState::Incompleted if run.cancelled => {}
            AnalysisState::Ready => {
                if self
                    .records
                    .cancel_analysis(analysis_id, &[AnalysisState::Ready], AnalysisState::Incompleted)
                    .await?
                {
                    self.publish_run_state(analysis_id, AnalysisState::Incompleted).await;
                }
            }
            AnalysisState::Running | AnalysisState::Incompleted => {
                if self
                    .records
                    .cancel_analysis(
                        analysis_id,
                        &[AnalysisState::Running, AnalysisState::Incompleted],
                        AnalysisState::Cancelling,
                    )
                    .await?
                {
                    info!(analysis_id, user_id, "Cancellation requested");
                    self.publish_run_state(analysis_id, AnalysisState::Cancelling).await;
                }
            }
            AnalysisState::Cancelling => {}
        }
        self.settle_cancellation(analysis_id).await?;
        Ok(self.records.get_analysis(analysis_id).await?.state)
    }

    /// Times out every open invocation whose deadline passed before `now`.
    ///
    /// Returns the ids of the tasks that were failed.
    pub async fn sweep_timeouts(&self, now: Timestamp) -> Result<Vec<String>, FlowError> {
        let mut expired = Vec::new();
        for entry in self.queue.overdue(now).await? {
            if !self.queue.mark_timed_out(&entry.id).await? {
                debug!(entry_id = %entry.id, "Entry settled before it timed out");
                continue;
            }
            let task_id = entry.event.task_id.clone();
            warn!(task_id = %task_id, entry_id = %entry.id, "Invocation timed out");
            self.fail_task(&entry.event.analysis_id, &task_id, "invocation timed out")
                .await?;
            self.reconcile_entry(&entry.id).await;
            expired.push(task_id);
        }
        Ok(expired)
    }

    /// Returns the current state of an analysis, its tasks and its event log.
    pub async fn get_analysis_status(&self, analysis_id: &str) -> Result<AnalysisStatus, FlowError> {
        let run = self.records.get_analysis(analysis_id).await?;
        let tasks = self
            .records
            .tasks_of(analysis_id)
            .await?
            .into_iter()
            .map(|t| TaskStatus {
                task_id: t.id,
                tool_id: t.tool_id,
                state: t.state,
                error: t.error,
            })
            .collect();
        Ok(AnalysisStatus {
            analysis_id: run.id,
            state: run.state,
            tasks,
            events: self.publisher.events(analysis_id).await?,
        })
    }

    /// Takes the callback worker. Only one worker can be taken per flow.
    pub fn callback_worker(self: &Arc<Self>) -> Result<CallbackWorker, FlowError> {
        let receiver = self
            .callback_receiver
            .lock()
            .take()
            .ok_or_else(|| FlowError::invalid_state("flow", "callbacks", "callback worker already taken"))?;
        Ok(CallbackWorker::new(Arc::downgrade(self), receiver))
    }

    /// Creates a timeout sweeper using the configured interval.
    #[must_use]
    pub fn timeout_sweeper(self: &Arc<Self>) -> TimeoutSweeper {
        TimeoutSweeper::new(Arc::downgrade(self), self.config.sweep_interval())
    }

    async fn graph_for(&self, analysis_id: &str) -> Result<Arc<DependencyGraph>, FlowError> {
        if let Some(graph) = self.graphs.get(analysis_id) {
            return Ok(graph.value().clone());
        }
        let graph = Arc::new(DependencyGraph::from_store(self.records.as_ref(), analysis_id).await?);
        self.graphs.insert(analysis_id.to_string(), graph.clone());
        Ok(graph)
    }

    async fn prepare(
        &self,
        run: &AnalysisRun,
        task: &TaskRecord,
        graph: &DependencyGraph,
        producers: &HashMap<String, TaskRecord>,
    ) -> Result<InvocationPayload, FlowError> {
        let tool = self
            .catalog
            .get_tool(&task.tool_id)
            .await?
            .ok_or_else(|| FlowError::ToolNotFound {
                tool_id: task.tool_id.clone(),
            })?;
        self.invocations
            .build(run, task, graph, &tool, producers)
            .await
    }

    async fn invoke(&self, payload: &InvocationPayload) -> Result<InvocationAck, FlowError> {
        let gateway = &self.gateway;
        let function_id = payload.function_id.as_str();
        let callback_url = payload.callback_url.as_str();
        with_retry(
            &self.config.dispatch_retry,
            &payload.task_id,
            FlowError::is_retryable,
            move || gateway.invoke_async(function_id, payload, callback_url),
        )
        .await
    }

    async fn dispatch_all(&self, analysis_id: &str, task_ids: Vec<String>) -> Vec<String> {
        let attempts = task_ids.iter().map(|id| self.dispatch_task(analysis_id, id));
        let results = join_all(attempts).await;
        task_ids
            .into_iter()
            .zip(results)
            .filter_map(|(task_id, result)| match result {
                Ok(DispatchOutcome::Dispatched { .. }) => Some(task_id),
                Ok(_) => None,
                Err(e) => {
                    error!(analysis_id, task_id = %task_id, error = %e, "Dispatch failed");
                    None
                }
            })
            .collect()
    }

    async fn record_report(&self, task_id: &str, body: &CallbackBody) -> Result<(), FlowError> {
        self.status
            .set(&keys::task_status(task_id), json!(body.status.to_string()))
            .await?;
        for sample in &body.cpu_samples {
            self.status
                .append(&keys::task_cpu_samples(task_id), json!(sample))
                .await?;
        }
        for sample in &body.memory_samples {
            self.status
                .append(&keys::task_memory_samples(task_id), json!(sample))
                .await?;
        }
        Ok(())
    }

    async fn complete_task(&self, task: &TaskRecord, body: &CallbackBody) -> Result<TaskState, FlowError> {
        let analysis_id = task.analysis_id.as_str();
        let run_bucket = self.invocations.run_bucket(analysis_id)?;
        let mut values = Vec::with_capacity(task.outputs.len());
        for output in &task.outputs {
            let reported = body.outputs.get(&output.name);
            let value = if output.data_type.is_memory() {
                let key = keys::memory_object(analysis_id, &task.id, &output.name);
                if let Some(object) = reported {
                    self.status.set(&key, object.clone()).await?;
                }
                ReferenceMarker::memory_output(analysis_id, &task.id, &output.name, &key).to_value()
            } else if output.data_type.is_blob() {
                let location = output_location(&run_bucket, analysis_id, &task.id, &output.name);
                ReferenceMarker::file_output(analysis_id, &task.id, &output.name, &location).to_value()
            } else if let Some(literal) = reported {
                literal.clone()
            } else {
                continue;
            };
            values.push((output.name.clone(), value));
        }
        self.records.set_output_values(&task.id, values).await?;

        if !self
            .records
            .transition_task(&task.id, TaskState::Pending, TaskState::Success, None)
            .await?
        {
            return Ok(self.records.get_task(&task.id).await?.state);
        }
        info!(analysis_id, task_id = %task.id, "Task succeeded");
        self.publisher.task_state(&task.id, TaskState::Success).await;
        self.publisher
            .publish(FlowEvent::task_succeeded(analysis_id, &task.id))
            .await;

        if !self.finish_if_done(analysis_id).await? {
            let run = self.records.get_analysis(analysis_id).await?;
            if !run.cancelled && run.state.accepts_dispatch() {
                let states: HashMap<String, TaskState> = self
                    .records
                    .tasks_of(analysis_id)
                    .await?
                    .into_iter()
                    .map(|t| (t.id, t.state))
                    .collect();
                let graph = self.graph_for(analysis_id).await?;
                self.dispatch_all(analysis_id, graph.ready_tasks(&states))
                    .await;
            }
            self.settle_cancellation(analysis_id).await?;
        }
        Ok(TaskState::Success)
    }

    /// Marks the run COMPLETED when every task succeeded. Returns true if
    /// nothing is left to dispatch.
    async fn finish_if_done(&self, analysis_id: &str) -> Result<bool, FlowError> {
        let tasks = self.records.tasks_of(analysis_id).await?;
        if !tasks.iter().all(|t| t.state == TaskState::Success) {
            return Ok(false);
        }
        if self
            .records
            .transition_analysis(analysis_id, &[AnalysisState::Running], AnalysisState::Completed)
            .await?
        {
            info!(analysis_id, "Analysis completed");
            self.publish_run_state(analysis_id, AnalysisState::Completed).await;
        }
        self.settle_cancellation(analysis_id).await?;
        Ok(true)
    }

    async fn fail_task(&self, analysis_id: &str, task_id: &str, reason: &str) -> Result<(), FlowError> {
        if !self
            .records
            .transition_task(task_id, TaskState::Pending, TaskState::Error, Some(reason.to_string()))
            .await?
        {
            return Ok(());
        }
        warn!(analysis_id, task_id, reason, "Task failed");
        self.publisher.task_state(task_id, TaskState::Error).await;
        self.publisher
            .publish(FlowEvent::task_failed(analysis_id, task_id, reason))
            .await;
        self.mark_incompleted(analysis_id).await
    }

    async fn mark_incompleted(&self, analysis_id: &str) -> Result<(), FlowError> {
        if self
            .records
            .transition_analysis(analysis_id, &[AnalysisState::Running], AnalysisState::Incompleted)
            .await?
        {
            self.publish_run_state(analysis_id, AnalysisState::Incompleted).await;
        }
        self.settle_cancellation(analysis_id).await
    }

    /// Finishes a drained cancellation and drops the cached graph of a run
    /// that has nothing left in flight.
    async fn settle_cancellation(&self, analysis_id: &str) -> Result<(), FlowError> {
        let run = self.records.get_analysis(analysis_id).await?;
        let in_flight = self
            .records
            .tasks_of(analysis_id)
            .await?
            .iter()
            .any(|t| t.state == TaskState::Pending);
        if in_flight {
            return Ok(());
        }

        let mut state = run.state;
        if state == AnalysisState::Cancelling
            && self
                .records
                .transition_analysis(analysis_id, &[AnalysisState::Cancelling], AnalysisState::Incompleted)
                .await?
        {
            info!(analysis_id, "Cancelled analysis drained");
            self.publish_run_state(analysis_id, AnalysisState::Incompleted).await;
            state = AnalysisState::Incompleted;
        }
        if matches!(state, AnalysisState::Completed | AnalysisState::Incompleted)
            && self.graphs.remove(analysis_id).is_some()
        {
            debug!(analysis_id, "Released cached graph");
        }
        Ok(())
    }

    async fn publish_run_state(&self, analysis_id: &str, state: AnalysisState) {
        self.publisher.analysis_state(analysis_id, state).await;
        let event_type = format!("analysis.{}", state.to_string().to_lowercase());
        self.publisher
            .publish(FlowEvent::new(event_type, analysis_id))
            .await;
    }

    async fn reconcile_task(&self, task_id: &str) {
        let recorded = match self.status.get(&keys::task_invocation(task_id)).await {
            Ok(value) => value.and_then(|v| v.as_str().map(str::to_string)),
            Err(e) => {
                error!(task_id, error = %e, "Failed to read invocation record");
                None
            }
        };
        let entry_id = match recorded {
            Some(id) => Some(id),
            None => match self.records.entries_for_task(task_id).await {
                Ok(entries) => entries.last().map(|e| e.id.clone()),
                Err(e) => {
                    error!(task_id, error = %e, "Failed to look up queue entries");
                    None
                }
            },
        };
        match entry_id {
            Some(entry_id) => self.reconcile_entry(&entry_id).await,
            None => warn!(task_id, "No queue entry to reconcile"),
        }
    }

    async fn reconcile_entry(&self, entry_id: &str) {
        match self.queue.reconcile(entry_id).await {
            Ok(outcome) => debug!(entry_id, serial = outcome.serial(), "Queue entry reconciled"),
            Err(e) => error!(entry_id, code = e.code(), error = %e, "Reconcile failed"),
        }
    }
}

fn ensure_owner(run: &AnalysisRun, user_id: &str) -> Result<(), FlowError> {
    if run.user_id == user_id {
        Ok(())
    } else {
        Err(FlowError::invalid_state(
            "analysis",
            &run.id,
            format!("analysis is not owned by user '{user_id}'"),
        ))
    }
}

fn apply_literals(
    analysis_id: &str,
    tasks: &mut [TaskRecord],
    literal_inputs: &LiteralInputs,
) -> Result<(), FlowError> {
    for (task_id, values) in literal_inputs {
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == task_id)
            .ok_or_else(|| {
                FlowError::invalid_state("analysis", analysis_id, format!("task '{task_id}' is not part of the analysis"))
            })?;
        for (name, value) in values {
            let input = task
                .inputs
                .iter_mut()
                .find(|i| &i.name == name)
                .ok_or_else(|| {
                    FlowError::invalid_state("task", task_id, format!("task has no input named '{name}'"))
                })?;
            input.value = value.clone();
        }
    }
    Ok(())
}
