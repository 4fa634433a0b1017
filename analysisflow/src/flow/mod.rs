//! Pipeline orchestration.
//!
//! [`Flow`] starts analyses, dispatches their tasks to the function gateway
//! in dependency order and follows them to completion:
//!
//! - Start checks ownership, admission, tool metadata and the graph, then
//!   dispatches the first ready-set concurrently
//! - Completion callbacks are messages drained by a [`CallbackWorker`]
//! - Each processed callback reconciles and meters its queue entry
//! - A [`TimeoutSweeper`] fails invocations whose callback never arrives
//!
//! Every state change is published to the status store and mirrored to
//! the configured [`EventSink`](crate::events::EventSink).

mod builder;
mod callback;
mod orchestrator;
mod publisher;
mod retry;
mod timeout;


pub use builder::FlowBuilder;
pub use callback::{CallbackBody, CallbackMessage, CallbackWorker};
pub use orchestrator::{
    AnalysisStatus, CallbackOutcome, DispatchOutcome, Flow, LiteralInputs, StartReceipt,
    TaskStatus,
};
pub use publisher::StatusPublisher;
pub use retry::{with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryState};
pub use timeout::TimeoutSweeper;
