//! Invocation payload construction.
//!
//! For each task about to be dispatched, inputs are resolved according to
//! their [`InputBinding`](crate::core::InputBinding): literals become
//! parameters, upstream outputs become loads from the run bucket or the
//! status store, and foreign blobs are staged into the run bucket first.

mod builder;
mod payload;
mod staging;

pub use builder::{output_location, run_bucket_name, InvocationBuilder};
pub use payload::{InvocationPayload, LoadDescriptor, MemoryCapture, MemoryLoad, UploadDescriptor};
pub use staging::{staged_location, BlobStager};
