//! Persistence: the shared status store and the record store.

pub mod keys;
mod records;
mod status;

pub use records::{InMemoryRecordStore, RecordStore};
pub use status::{InMemoryStatusStore, StatusStore};
