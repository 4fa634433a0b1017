//! Core domain model types for analysisflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Analysis, task and queue lifecycle states
//! - Persisted analysis and task records
//! - Declared data types and input classification
//! - Flow events

mod binding;
mod event;
mod model;
mod status;

pub use binding::{
    classify_input, BlobKind, BlobRef, DataType, InputBinding, ReferenceMarker, ScalarKind,
    UnknownDataType,
};
pub use event::FlowEvent;
pub use model::{AnalysisRun, DependencyPointer, InputSpec, OutputSpec, TaskRecord};
pub use status::{AnalysisState, InvocationStatus, QueueState, TaskState};
