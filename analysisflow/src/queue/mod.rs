//! Task queue and resource metering.
//!
//! One queue entry is recorded per dispatched invocation. When the
//! invocation finishes, the entry is reconciled: the reported status and
//! resource samples are read from the status store, converted into quota
//! units and debited from the user's ledger exactly once.

mod entry;
mod metering;
mod task_queue;

pub use entry::{QueueEntry, QueueEvent};
pub use metering::{Charge, Meter, MINIMUM_TOTAL};
pub use task_queue::{ReconcileOutcome, TaskQueue};
