//! Turns a task and its resolved inputs into an invocation payload.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use super::payload::{InvocationPayload, LoadDescriptor, MemoryCapture, MemoryLoad, UploadDescriptor};
use super::staging::BlobStager;
use crate::core::{
    AnalysisRun, BlobKind, BlobRef, DependencyPointer, InputBinding, InputSpec, ReferenceMarker,
    TaskRecord, TaskState,
};
use crate::errors::{FlowError, UnresolvedDependencyError};
use crate::graph::DependencyGraph;
use crate::ports::{BlobStore, ToolMetadata};
use crate::store::keys;

static BUCKET_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$"));

static IPV4_LIKE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$"));

fn compiled(pattern: &'static LazyLock<Result<Regex, regex::Error>>) -> Result<&'static Regex, FlowError> {
    pattern
        .as_ref()
        .map_err(|e| FlowError::Config(format!("invalid bucket pattern: {e}")))
}

/// Returns the bucket holding the files of one run.
///
/// The name is `<prefix><analysis_id>`, lower-cased and checked against the
/// S3 bucket naming rules.
pub fn run_bucket_name(prefix: &str, analysis_id: &str) -> Result<String, FlowError> {
    let name = format!("{prefix}{analysis_id}").to_lowercase();
    let valid = compiled(&BUCKET_NAME)?.is_match(&name)
        && !compiled(&IPV4_LIKE)?.is_match(&name)
        && !name.contains("..")
        && !name.contains(".-")
        && !name.contains("-.");
    if valid {
        Ok(name)
    } else {
        Err(FlowError::Config(format!("'{name}' is not a valid bucket name")))
    }
}

/// Returns where a task uploads a file or directory output.
#[must_use]
pub fn output_location(run_bucket: &str, analysis_id: &str, task_id: &str, output: &str) -> BlobRef {
    BlobRef::new(run_bucket, format!("{analysis_id}/{task_id}/{output}"))
}

/// Builds invocation payloads.
#[derive(Debug)]
pub struct InvocationBuilder {
    stager: BlobStager,
    bucket_prefix: String,
    callback_base_url: String,
}

impl InvocationBuilder {
    /// Creates a builder staging into buckets named `<bucket_prefix><analysis_id>`.
    #[must_use]
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        bucket_prefix: impl Into<String>,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self {
            stager: BlobStager::new(blobs),
            bucket_prefix: bucket_prefix.into(),
            callback_base_url: callback_base_url.into(),
        }
    }

    /// Returns the run bucket of an analysis.
    pub fn run_bucket(&self, analysis_id: &str) -> Result<String, FlowError> {
        run_bucket_name(&self.bucket_prefix, analysis_id)
    }

    /// Returns the callback URL of a task.
    #[must_use]
    pub fn callback_url(&self, task_id: &str) -> String {
        format!(
            "{}/tasks/{task_id}/callback",
            self.callback_base_url.trim_end_matches('/')
        )
    }

    /// Builds the payload of `task`.
    ///
    /// `producers` holds the current records of the task's upstream tasks.
    /// Foreign blobs are staged into the run bucket on the way. The task
    /// record itself is never modified.
    pub async fn build(
        &self,
        run: &AnalysisRun,
        task: &TaskRecord,
        graph: &DependencyGraph,
        tool: &ToolMetadata,
        producers: &HashMap<String, TaskRecord>,
    ) -> Result<InvocationPayload, FlowError> {
        let run_bucket = self.run_bucket(&run.id)?;
        let mut payload = InvocationPayload {
            analysis_id: run.id.clone(),
            task_id: task.id.clone(),
            function_id: tool.function_id.clone(),
            launch: tool.launch.clone(),
            parameters: BTreeMap::new(),
            loads: Vec::new(),
            memory_loads: Vec::new(),
            uploads: Vec::new(),
            memory_captures: Vec::new(),
            callback_url: self.callback_url(&task.id),
        };

        for input in &task.inputs {
            let binding = graph
                .binding(&task.id, &input.name)
                .ok_or_else(|| FlowError::invalid_state("task", &task.id, format!("input '{}' is not in the graph", input.name)))?;
            self.resolve_input(&mut payload, &run_bucket, task, input, binding, producers)
                .await?;
        }

        for output in &task.outputs {
            if output.data_type.is_memory() {
                payload.memory_captures.push(MemoryCapture {
                    output: output.name.clone(),
                    key: keys::memory_object(&run.id, &task.id, &output.name),
                });
            } else if let Some(kind) = output.data_type.blob_kind() {
                let location = output_location(&run_bucket, &run.id, &task.id, &output.name);
                payload.uploads.push(UploadDescriptor {
                    output: output.name.clone(),
                    bucket: location.bucket,
                    object_path: location.object_path,
                    kind,
                });
            }
        }

        Ok(payload)
    }

    async fn resolve_input(
        &self,
        payload: &mut InvocationPayload,
        run_bucket: &str,
        task: &TaskRecord,
        input: &InputSpec,
        binding: &InputBinding,
        producers: &HashMap<String, TaskRecord>,
    ) -> Result<(), FlowError> {
        let kind = input.data_type.blob_kind().unwrap_or(BlobKind::File);
        match binding {
            InputBinding::FrontData(value) => {
                payload.parameters.insert(input.name.clone(), value.clone());
            }
            InputBinding::DependsFile(pointer) => {
                let marker = materialized(task, input, pointer, producers)?;
                let blob = marker.blob().ok_or_else(|| unresolved(task, input, pointer))?;
                payload.loads.push(LoadDescriptor {
                    input: input.name.clone(),
                    bucket: blob.bucket,
                    object_path: blob.object_path,
                    kind,
                });
            }
            InputBinding::DependsMemory(pointer) => {
                let marker = materialized(task, input, pointer, producers)?;
                let key = marker.memory_key().unwrap_or_else(|| {
                    keys::memory_object(&task.analysis_id, &pointer.upstream_task_id, &pointer.output_name)
                });
                payload.memory_loads.push(MemoryLoad {
                    input: input.name.clone(),
                    key,
                });
            }
            InputBinding::DataFile(sources) => {
                for source in sources {
                    let staged = self.stager.stage(source, run_bucket, kind).await?;
                    payload.loads.push(LoadDescriptor {
                        input: input.name.clone(),
                        bucket: staged.bucket,
                        object_path: staged.object_path,
                        kind,
                    });
                }
            }
            InputBinding::DataMemory { key } => {
                payload.memory_loads.push(MemoryLoad {
                    input: input.name.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Returns the materialized output marker a dependency points at.
fn materialized(
    task: &TaskRecord,
    input: &InputSpec,
    pointer: &DependencyPointer,
    producers: &HashMap<String, TaskRecord>,
) -> Result<ReferenceMarker, FlowError> {
    producers
        .get(&pointer.upstream_task_id)
        .filter(|producer| producer.state == TaskState::Success)
        .and_then(|producer| producer.output(&pointer.output_name))
        .and_then(|output| output.value.as_ref())
        .and_then(ReferenceMarker::from_value)
        .ok_or_else(|| unresolved(task, input, pointer))
}

fn unresolved(task: &TaskRecord, input: &InputSpec, pointer: &DependencyPointer) -> FlowError {
    UnresolvedDependencyError::new(
        &task.id,
        &input.name,
        &pointer.upstream_task_id,
        &pointer.output_name,
    )
    .into()
}
