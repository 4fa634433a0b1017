//! Declared data types and the classification of input values.
//!
//! Type strings coming from the tool catalog ("file", "dir", "datasets",
//! "List[datasets]", "pickle", ...) are parsed once into [`DataType`], and
//! every input value is classified once into an [`InputBinding`] when the
//! dependency graph is built. Dispatch code matches on these enums and never
//! re-inspects raw JSON.

use super::{DependencyPointer, InputSpec};
use crate::errors::DanglingReferenceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of literal scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// A string.
    Str,
    /// An integer.
    Int,
    /// A float.
    Float,
    /// A boolean.
    Bool,
    /// Any JSON value.
    Any,
}

/// Declared type of an input or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// A literal scalar.
    Scalar(ScalarKind),
    /// A single file in the blob store.
    File,
    /// A directory (object prefix) in the blob store.
    Dir,
    /// A native in-memory object, carried through the status store.
    Memory(String),
    /// An uploaded dataset.
    Dataset,
    /// A list of uploaded datasets.
    DatasetList,
}

impl DataType {
    /// Returns true for in-memory types, which are never staged to the blob store.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Returns true for types that live in the blob store.
    #[must_use]
    pub fn is_blob(&self) -> bool {
        matches!(self, Self::File | Self::Dir | Self::Dataset | Self::DatasetList)
    }

    /// Returns the blob kind used in load/upload descriptors.
    #[must_use]
    pub fn blob_kind(&self) -> Option<BlobKind> {
        match self {
            Self::File => Some(BlobKind::File),
            Self::Dir => Some(BlobKind::Dir),
            Self::Dataset | Self::DatasetList => Some(BlobKind::Dataset),
            Self::Scalar(_) | Self::Memory(_) => None,
        }
    }
}

/// Error for unknown type strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDataType(pub String);

impl fmt::Display for UnknownDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data type '{}'", self.0)
    }
}

impl std::error::Error for UnknownDataType {}

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.trim() {
            "str" | "string" => Self::Scalar(ScalarKind::Str),
            "int" | "integer" => Self::Scalar(ScalarKind::Int),
            "float" | "number" => Self::Scalar(ScalarKind::Float),
            "bool" | "boolean" => Self::Scalar(ScalarKind::Bool),
            "any" | "json" => Self::Scalar(ScalarKind::Any),
            "file" => Self::File,
            "dir" | "directory" => Self::Dir,
            "datasets" | "dataset" => Self::Dataset,
            "List[datasets]" | "list[datasets]" => Self::DatasetList,
            format @ ("memory" | "pickle" | "object" | "dataframe") => Self::Memory(format.to_string()),
            other => return Err(UnknownDataType(other.to_string())),
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for DataType {
    type Error = UnknownDataType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(ScalarKind::Str) => write!(f, "str"),
            Self::Scalar(ScalarKind::Int) => write!(f, "int"),
            Self::Scalar(ScalarKind::Float) => write!(f, "float"),
            Self::Scalar(ScalarKind::Bool) => write!(f, "bool"),
            Self::Scalar(ScalarKind::Any) => write!(f, "any"),
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
            Self::Memory(format) => write!(f, "{format}"),
            Self::Dataset => write!(f, "datasets"),
            Self::DatasetList => write!(f, "List[datasets]"),
        }
    }
}

/// Kind of blob referenced by a load or upload descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    /// A single object.
    File,
    /// All objects under a prefix.
    Dir,
    /// An uploaded dataset object.
    Dataset,
}

/// Location of a blob in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// Bucket name.
    pub bucket: String,
    /// Object path (or prefix for directories).
    pub object_path: String,
}

impl BlobRef {
    /// Creates a new blob reference.
    #[must_use]
    pub fn new(bucket: impl Into<String>, object_path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_path: object_path.into(),
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.object_path)
    }
}

/// A reference marker embedded in an input or output value.
///
/// Markers are JSON objects flagged with `is_file` or `is_memory`. Outputs
/// are materialized as markers, so a downstream analysis can reference them
/// as foreign data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceMarker {
    /// Marks a blob reference.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_file: bool,
    /// Marks an in-memory object reference.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_memory: bool,
    /// Analysis that owns the referenced object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    /// Producing task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Producing output name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Bucket of a blob reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Object path of a blob reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Status store key of an in-memory object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ReferenceMarker {
    /// Builds the marker stored on a file/dir output once its task succeeds.
    #[must_use]
    pub fn file_output(analysis_id: &str, task_id: &str, output: &str, location: &BlobRef) -> Self {
        Self {
            is_file: true,
            analysis_id: Some(analysis_id.to_string()),
            task_id: Some(task_id.to_string()),
            output: Some(output.to_string()),
            bucket: Some(location.bucket.clone()),
            path: Some(location.object_path.clone()),
            ..Self::default()
        }
    }

    /// Builds the marker stored on a memory output once its task succeeds.
    #[must_use]
    pub fn memory_output(analysis_id: &str, task_id: &str, output: &str, key: &str) -> Self {
        Self {
            is_memory: true,
            analysis_id: Some(analysis_id.to_string()),
            task_id: Some(task_id.to_string()),
            output: Some(output.to_string()),
            key: Some(key.to_string()),
            ..Self::default()
        }
    }

    /// Parses a marker out of a raw value, if the value is one.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let flagged = obj.get("is_file").and_then(serde_json::Value::as_bool) == Some(true)
            || obj.get("is_memory").and_then(serde_json::Value::as_bool) == Some(true);
        if !flagged {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Converts the marker into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Returns the blob location, if both bucket and path are present.
    #[must_use]
    pub fn blob(&self) -> Option<BlobRef> {
        match (&self.bucket, &self.path) {
            (Some(bucket), Some(path)) => Some(BlobRef::new(bucket, path)),
            _ => None,
        }
    }

    /// Returns the status store key of an in-memory object.
    #[must_use]
    pub fn memory_key(&self) -> Option<String> {
        if let Some(key) = &self.key {
            return Some(key.clone());
        }
        match (&self.analysis_id, &self.task_id, &self.output) {
            (Some(a), Some(t), Some(o)) => Some(crate::store::keys::memory_object(a, t, o)),
            _ => None,
        }
    }

    fn pointer(&self) -> Option<DependencyPointer> {
        match (&self.task_id, &self.output) {
            (Some(task), Some(output)) => Some(DependencyPointer::new(task, output)),
            _ => None,
        }
    }
}

/// How an input is satisfied, decided once at graph-build time.
#[derive(Debug, Clone, PartialEq)]
pub enum InputBinding {
    /// A literal supplied by the caller (FRONT_DATA).
    FrontData(serde_json::Value),
    /// A file/dir produced by a task of the same run (DEPENDS_FILE).
    DependsFile(DependencyPointer),
    /// An in-memory object produced by a task of the same run (DEPENDS_MEMORY).
    DependsMemory(DependencyPointer),
    /// Read-only blobs owned elsewhere, staged by copy (DATA_FILE).
    DataFile(Vec<BlobRef>),
    /// A read-only in-memory object owned elsewhere (DATA_MEMORY).
    DataMemory {
        /// Status store key of the object.
        key: String,
    },
}

impl InputBinding {
    /// Returns the same-run producer pointer, if any.
    #[must_use]
    pub fn dependency(&self) -> Option<&DependencyPointer> {
        match self {
            Self::DependsFile(p) | Self::DependsMemory(p) => Some(p),
            _ => None,
        }
    }

    /// Short classification label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::FrontData(_) => "FRONT_DATA",
            Self::DependsFile(_) => "DEPENDS_FILE",
            Self::DependsMemory(_) => "DEPENDS_MEMORY",
            Self::DataFile(_) => "DATA_FILE",
            Self::DataMemory { .. } => "DATA_MEMORY",
        }
    }
}

/// Classifies one declared input of `task_id` in the context of `analysis_id`.
///
/// # Errors
///
/// Returns a [`DanglingReferenceError`] when a marker lacks the fields needed
/// to locate the referenced object.
pub fn classify_input(
    analysis_id: &str,
    task_id: &str,
    input: &InputSpec,
) -> Result<InputBinding, DanglingReferenceError> {
    let memory = input.data_type.is_memory();

    if let Some(pointer) = &input.dependency {
        return Ok(if memory {
            InputBinding::DependsMemory(pointer.clone())
        } else {
            InputBinding::DependsFile(pointer.clone())
        });
    }

    if input.data_type == DataType::DatasetList {
        if let Some(items) = input.value.as_array() {
            let mut refs = Vec::with_capacity(items.len());
            for item in items {
                let blob = ReferenceMarker::from_value(item)
                    .and_then(|m| m.blob())
                    .ok_or_else(|| missing_location(task_id, input))?;
                refs.push(blob);
            }
            return Ok(InputBinding::DataFile(refs));
        }
    }

    let Some(marker) = ReferenceMarker::from_value(&input.value) else {
        return Ok(InputBinding::FrontData(input.value.clone()));
    };

    let same_run = marker.analysis_id.as_deref() == Some(analysis_id);
    if same_run {
        let pointer = marker
            .pointer()
            .ok_or_else(|| missing_location(task_id, input))?;
        return Ok(if marker.is_memory {
            InputBinding::DependsMemory(pointer)
        } else {
            InputBinding::DependsFile(pointer)
        });
    }

    if marker.is_memory {
        let key = marker
            .memory_key()
            .ok_or_else(|| missing_location(task_id, input))?;
        Ok(InputBinding::DataMemory { key })
    } else {
        let blob = marker.blob().ok_or_else(|| missing_location(task_id, input))?;
        Ok(InputBinding::DataFile(vec![blob]))
    }
}

fn missing_location(task_id: &str, input: &InputSpec) -> DanglingReferenceError {
    DanglingReferenceError::missing_task(task_id, &input.name, "<unlocatable reference>")
}
