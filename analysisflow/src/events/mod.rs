//! Event sinks mirroring flow events for observability.
//!
//! The orchestrator persists every [`FlowEvent`](crate::core::FlowEvent) to the
//! status store and additionally hands it to an [`EventSink`], which by default
//! writes it to the tracing log.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
