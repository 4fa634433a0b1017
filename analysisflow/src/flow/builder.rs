//! Assembly of a [`Flow`] from its collaborators.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::orchestrator::Flow;
use super::publisher::StatusPublisher;
use crate::config::FlowConfig;
use crate::errors::FlowError;
use crate::events::{EventSink, LoggingEventSink};
use crate::invocation::InvocationBuilder;
use crate::ledger::{InMemoryQuotaLedger, LedgerAdmission, QuotaLedger};
use crate::ports::{AdmissionCheck, BlobStore, FunctionGateway, InMemoryBlobStore, InMemoryToolCatalog, ToolCatalog};
use crate::queue::{Meter, TaskQueue};
use crate::store::{InMemoryRecordStore, InMemoryStatusStore, RecordStore, StatusStore};

/// Builder for [`Flow`].
///
/// Every collaborator except the function gateway defaults to its in-memory
/// implementation. Admission defaults to [`LedgerAdmission`] over the
/// configured ledger.
#[derive(Default)]
pub struct FlowBuilder {
    config: FlowConfig,
    records: Option<Arc<dyn RecordStore>>,
    status: Option<Arc<dyn StatusStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    ledger: Option<Arc<dyn QuotaLedger>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    admission: Option<Arc<dyn AdmissionCheck>>,
    gateway: Option<Arc<dyn FunctionGateway>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for FlowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBuilder")
            .field("config", &self.config)
            .field("has_gateway", &self.gateway.is_some())
            .finish_non_exhaustive()
    }
}

impl Flow {
    /// Starts building a flow.
    #[must_use]
    pub fn builder(config: FlowConfig) -> FlowBuilder {
        FlowBuilder::new(config)
    }
}

impl FlowBuilder {
    /// Creates a builder with the given configuration.
    #[must_use]
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Sets the record store.
    #[must_use]
    pub fn with_records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Sets the status store.
    #[must_use]
    pub fn with_status_store(mut self, status: Arc<dyn StatusStore>) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the blob store.
    #[must_use]
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Sets the quota ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn QuotaLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Sets the tool catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Overrides the admission check.
    #[must_use]
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionCheck>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Sets the function gateway.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn FunctionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates the configuration and builds the flow.
    pub fn build(self) -> Result<Flow, FlowError> {
        self.config.validate()?;
        let gateway = self
            .gateway
            .ok_or_else(|| FlowError::Config("a function gateway is required".into()))?;

        let records = self
            .records
            .unwrap_or_else(|| Arc::new(InMemoryRecordStore::new()));
        let status = self
            .status
            .unwrap_or_else(|| Arc::new(InMemoryStatusStore::new()));
        let blobs = self
            .blobs
            .unwrap_or_else(|| Arc::new(InMemoryBlobStore::new()));
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(InMemoryQuotaLedger::new()));
        let admission = self
            .admission
            .unwrap_or_else(|| Arc::new(LedgerAdmission::new(ledger.clone())));
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(InMemoryToolCatalog::new()));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(LoggingEventSink::default()));

        let queue = TaskQueue::new(
            records.clone(),
            status.clone(),
            ledger,
            Meter::new(self.config.metering.clone())?,
            self.config.callback_timeout_seconds,
        );
        let invocations = InvocationBuilder::new(
            blobs,
            self.config.bucket_prefix.clone(),
            self.config.callback_base_url.clone(),
        );
        let (callbacks, receiver) = mpsc::unbounded_channel();

        Ok(Flow {
            publisher: StatusPublisher::new(status.clone(), sink),
            config: self.config,
            records,
            status,
            catalog,
            admission,
            gateway,
            queue,
            invocations,
            graphs: DashMap::new(),
            callbacks,
            callback_receiver: Mutex::new(Some(receiver)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MockFunctionGateway;

    #[test]
    fn test_build_requires_gateway() {
        let err = Flow::builder(FlowConfig::default()).build().unwrap_err();
        assert_eq!(err.code(), "CONFIG");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = FlowConfig::default().with_callback_timeout_seconds(0);
        let err = Flow::builder(config)
            .with_gateway(Arc::new(MockFunctionGateway::new()))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG");
    }

    #[test]
    fn test_callback_worker_taken_once() {
        let flow = Arc::new(
            Flow::builder(FlowConfig::default())
                .with_gateway(Arc::new(MockFunctionGateway::new()))
                .build()
                .unwrap(),
        );
        assert!(flow.callback_worker().is_ok());
        assert!(flow.callback_worker().is_err());
    }
}
