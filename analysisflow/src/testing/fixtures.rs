//! Test fixtures: a fully wired in-memory flow and record builders.

use std::sync::Arc;

use super::mocks::RecordingGateway;
use crate::config::FlowConfig;
use crate::core::{
    AnalysisRun, AnalysisState, DataType, InputSpec, OutputSpec, TaskRecord, TaskState,
};
use crate::errors::FlowError;
use crate::events::CollectingEventSink;
use crate::flow::{
    CallbackBody, CallbackOutcome, Flow, JitterStrategy, LiteralInputs, RetryConfig, StartReceipt,
};
use crate::ledger::{InMemoryQuotaLedger, QuotaAccount};
use crate::ports::{AdmissionCheck, InMemoryBlobStore, InMemoryToolCatalog, LaunchDescriptor, ToolMetadata};
use crate::store::{InMemoryRecordStore, InMemoryStatusStore, RecordStore};

/// User owning the analyses seeded by [`FlowHarness`].
pub const TEST_USER: &str = "user-1";

/// Balance of [`TEST_USER`] in a fresh harness.
pub const TEST_BALANCE: f64 = 100.0;

/// Configuration with millisecond retries and a short callback deadline.
#[must_use]
pub fn test_config() -> FlowConfig {
    FlowConfig::default()
        .with_callback_timeout_seconds(60)
        .with_dispatch_retry(
            RetryConfig::new()
                .with_max_attempts(3)
                .with_base_delay_ms(1)
                .with_max_delay_ms(5)
                .with_jitter(JitterStrategy::None),
        )
}

/// Function id registered for a tool by [`FlowHarness::seed`].
#[must_use]
pub fn function_for(tool_id: &str) -> String {
    format!("fn-{tool_id}")
}

/// A linear chain `t1 -> t2 -> ... -> tn` passing one file along.
///
/// Task `i` declares output `out{i}`; every task but the first reads the
/// previous task's output through input `in`.
#[must_use]
pub fn chain_tasks(analysis_id: &str, len: usize) -> Vec<TaskRecord> {
    (1..=len)
        .map(|i| {
            let task = TaskRecord::with_id(format!("t{i}"), analysis_id, format!("tool-{i}"))
                .with_output(OutputSpec::new(format!("out{i}"), DataType::File));
            if i == 1 {
                task
            } else {
                task.with_input(InputSpec::depends_on(
                    "in",
                    DataType::File,
                    format!("t{}", i - 1),
                    format!("out{}", i - 1),
                ))
            }
        })
        .collect()
}

/// A flow over in-memory collaborators, with handles to all of them.
pub struct FlowHarness {
    /// The flow under test.
    pub flow: Arc<Flow>,
    /// Record store.
    pub records: Arc<InMemoryRecordStore>,
    /// Status store.
    pub status: Arc<InMemoryStatusStore>,
    /// Blob store.
    pub blobs: Arc<InMemoryBlobStore>,
    /// Quota ledger, with [`TEST_USER`] funded.
    pub ledger: Arc<InMemoryQuotaLedger>,
    /// Tool catalog.
    pub catalog: Arc<InMemoryToolCatalog>,
    /// Gateway.
    pub gateway: Arc<RecordingGateway>,
    /// Collected events.
    pub events: Arc<CollectingEventSink>,
}

impl std::fmt::Debug for FlowHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHarness")
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl FlowHarness {
    /// Creates a harness with an accepting gateway.
    pub fn new() -> Result<Self, FlowError> {
        Self::with_gateway(RecordingGateway::new())
    }

    /// Creates a harness around `gateway`.
    pub fn with_gateway(gateway: RecordingGateway) -> Result<Self, FlowError> {
        Self::assemble(test_config(), gateway, None)
    }

    /// Creates a harness with a custom configuration.
    pub fn with_config(config: FlowConfig, gateway: RecordingGateway) -> Result<Self, FlowError> {
        Self::assemble(config, gateway, None)
    }

    /// Creates a harness with a custom admission check.
    pub fn with_admission(admission: Arc<dyn AdmissionCheck>) -> Result<Self, FlowError> {
        Self::assemble(test_config(), RecordingGateway::new(), Some(admission))
    }

    fn assemble(
        config: FlowConfig,
        gateway: RecordingGateway,
        admission: Option<Arc<dyn AdmissionCheck>>,
    ) -> Result<Self, FlowError> {
        let records = Arc::new(InMemoryRecordStore::new());
        let status = Arc::new(InMemoryStatusStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let ledger = Arc::new(InMemoryQuotaLedger::with_accounts([QuotaAccount::new(
            TEST_USER,
            TEST_BALANCE,
        )]));
        let catalog = Arc::new(InMemoryToolCatalog::new());
        let gateway = Arc::new(gateway);
        let events = Arc::new(CollectingEventSink::new());

        let mut builder = Flow::builder(config)
            .with_records(records.clone())
            .with_status_store(status.clone())
            .with_blob_store(blobs.clone())
            .with_ledger(ledger.clone())
            .with_catalog(catalog.clone())
            .with_gateway(gateway.clone())
            .with_event_sink(events.clone());
        if let Some(admission) = admission {
            builder = builder.with_admission(admission);
        }

        Ok(Self {
            flow: Arc::new(builder.build()?),
            records,
            status,
            blobs,
            ledger,
            catalog,
            gateway,
            events,
        })
    }

    /// Persists an analysis owned by [`TEST_USER`] with `tasks`, registering
    /// a tool for every task.
    pub async fn seed(&self, analysis_id: &str, tasks: Vec<TaskRecord>) -> Result<AnalysisRun, FlowError> {
        let mut run = AnalysisRun::with_id(analysis_id, TEST_USER);
        for task in tasks {
            self.register_tool(&task.tool_id);
            run.task_ids.push(task.id.clone());
            self.records.put_task(task).await?;
        }
        self.records.put_analysis(run.clone()).await?;
        Ok(run)
    }

    /// Registers a tool backed by [`function_for`].
    pub fn register_tool(&self, tool_id: &str) {
        self.catalog.register(ToolMetadata::new(
            tool_id,
            function_for(tool_id),
            LaunchDescriptor::new("main.py", "handler"),
        ));
    }

    /// Starts an analysis as [`TEST_USER`] without literal inputs.
    pub async fn start(&self, analysis_id: &str) -> Result<StartReceipt, FlowError> {
        self.flow
            .start_analysis(analysis_id, &LiteralInputs::new(), TEST_USER)
            .await
    }

    /// Processes a SUCCESS callback for a task.
    pub async fn succeed(&self, task_id: &str) -> Result<CallbackOutcome, FlowError> {
        self.flow
            .process_callback(task_id, CallbackBody::success())
            .await
    }

    /// Processes an ERROR callback for a task.
    pub async fn fail(&self, task_id: &str, message: &str) -> Result<CallbackOutcome, FlowError> {
        self.flow
            .process_callback(task_id, CallbackBody::error(message))
            .await
    }

    /// Returns the stored state of a task.
    pub async fn task_state(&self, task_id: &str) -> Result<TaskState, FlowError> {
        Ok(self.records.get_task(task_id).await?.state)
    }

    /// Returns the stored state of an analysis.
    pub async fn run_state(&self, analysis_id: &str) -> Result<AnalysisState, FlowError> {
        Ok(self.records.get_analysis(analysis_id).await?.state)
    }

    /// Returns the current balance of [`TEST_USER`].
    pub async fn balance(&self) -> Result<f64, FlowError> {
        use crate::ledger::QuotaLedger;
        self.ledger
            .account(TEST_USER)
            .await?
            .map(|a| a.balance)
            .ok_or_else(|| FlowError::not_found("account", TEST_USER))
    }
}
