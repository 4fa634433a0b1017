//! # Analysisflow
//!
//! Pipeline execution engine for multi-step analyses running on a
//! Function-as-a-Service gateway.
//!
//! An analysis is a set of tasks wired together by their inputs and outputs.
//! Analysisflow provides:
//!
//! - **Dependency graphs**: typed task/input/output graphs with cycle and
//!   dangling reference detection, topological order and ready-sets
//! - **Invocation payloads**: input resolution, idempotent blob staging and
//!   upload/memory capture descriptors
//! - **Orchestration**: concurrent dispatch, callback-driven completion,
//!   cancellation and per-invocation deadlines
//! - **Metering**: resource samples converted into quota units and debited
//!   exactly once from a prepaid ledger
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use analysisflow::prelude::*;
//!
//! let flow = Arc::new(
//!     Flow::builder(FlowConfig::from_env()?)
//!         .with_gateway(Arc::new(HttpFunctionGateway::new(gateway_config)?))
//!         .with_ledger(ledger)
//!         .build()?,
//! );
//! flow.callback_worker()?.spawn();
//! flow.timeout_sweeper().spawn();
//!
//! let receipt = flow.start_analysis(&analysis_id, &LiteralInputs::new(), &user_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod flow;
pub mod graph;
pub mod invocation;
pub mod ledger;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ExchangeRate, FlowConfig, GatewayConfig, MeteringConfig, ResourceKind};
    pub use crate::core::{
        AnalysisRun, AnalysisState, DataType, FlowEvent, InputBinding, InputSpec, OutputSpec,
        QueueState, TaskRecord, TaskState,
    };
    pub use crate::errors::FlowError;
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::flow::{
        AnalysisStatus, CallbackBody, Flow, FlowBuilder, LiteralInputs, RetryConfig, StartReceipt,
    };
    pub use crate::graph::{DependencyGraph, DependencyGraphBuilder};
    pub use crate::ledger::{InMemoryQuotaLedger, QuotaAccount, QuotaLedger};
    #[cfg(feature = "http")]
    pub use crate::ports::HttpFunctionGateway;
    pub use crate::ports::{BlobStore, FunctionGateway, InvocationAck, ToolCatalog, ToolMetadata};
    pub use crate::store::{RecordStore, StatusStore};
    pub use crate::utils::{generate_id, iso_timestamp, Timestamp};
}
