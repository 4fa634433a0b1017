//! The invocation payload sent to a remote function.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::BlobKind;
use crate::ports::LaunchDescriptor;

/// A blob the function must download before running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDescriptor {
    /// Input the blob is bound to.
    pub input: String,
    /// Bucket holding the blob.
    pub bucket: String,
    /// Object path (prefix for directories).
    pub object_path: String,
    /// Blob kind.
    pub kind: BlobKind,
}

/// An in-memory object the function must load from the status store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLoad {
    /// Input the object is bound to.
    pub input: String,
    /// Status store key.
    pub key: String,
}

/// A file or directory the function must upload after running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDescriptor {
    /// Output the upload materializes.
    pub output: String,
    /// Destination bucket.
    pub bucket: String,
    /// Destination object path.
    pub object_path: String,
    /// Blob kind.
    pub kind: BlobKind,
}

/// An in-memory output the function must store under a status key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCapture {
    /// Output name.
    pub output: String,
    /// Status store key.
    pub key: String,
}

/// Everything a remote function needs for one task invocation.
///
/// Built fresh for each dispatch and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPayload {
    /// Owning analysis.
    pub analysis_id: String,
    /// Invoked task.
    pub task_id: String,
    /// Remote function.
    pub function_id: String,
    /// How to start the tool.
    pub launch: LaunchDescriptor,
    /// Literal parameters by input name.
    pub parameters: BTreeMap<String, Value>,
    /// Blobs to download.
    pub loads: Vec<LoadDescriptor>,
    /// In-memory objects to load.
    pub memory_loads: Vec<MemoryLoad>,
    /// Expected file/dir outputs.
    pub uploads: Vec<UploadDescriptor>,
    /// Expected in-memory outputs.
    pub memory_captures: Vec<MemoryCapture>,
    /// Completion callback.
    pub callback_url: String,
}

impl InvocationPayload {
    /// Creates a payload with no inputs or outputs.
    #[must_use]
    pub fn empty(
        analysis_id: impl Into<String>,
        task_id: impl Into<String>,
        function_id: impl Into<String>,
    ) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            task_id: task_id.into(),
            function_id: function_id.into(),
            launch: LaunchDescriptor::new("", ""),
            parameters: BTreeMap::new(),
            loads: Vec::new(),
            memory_loads: Vec::new(),
            uploads: Vec::new(),
            memory_captures: Vec::new(),
            callback_url: String::new(),
        }
    }

    /// Returns the load descriptors of one input.
    #[must_use]
    pub fn loads_for(&self, input: &str) -> Vec<&LoadDescriptor> {
        self.loads.iter().filter(|l| l.input == input).collect()
    }
}
