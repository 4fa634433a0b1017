//! Ports to the external collaborators of the engine.
//!
//! Each collaborator is an `async_trait` trait with an in-memory
//! implementation used by tests and embedded deployments.

mod admission;
mod blob;
mod catalog;
mod gateway;
#[cfg(feature = "http")]
mod http;

pub use admission::{AdmissionCheck, StaticAdmission};
pub use blob::{BlobStore, InMemoryBlobStore};
pub use catalog::{InMemoryToolCatalog, LaunchDescriptor, ToolCatalog, ToolMetadata};
#[cfg(test)]
pub use gateway::MockFunctionGateway;
pub use gateway::{FunctionGateway, InvocationAck};
#[cfg(feature = "http")]
pub use http::{HttpFunctionGateway, CALLBACK_HEADER};
