//! Builds the dependency graph of an analysis from its task records.

use std::collections::HashMap;
use tracing::debug;

use super::dag::{topological_levels, GraphNode};
use super::DependencyGraph;
use crate::core::{classify_input, TaskRecord};
use crate::errors::{DanglingReferenceError, FlowError};

/// Builder of [`DependencyGraph`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphBuilder;

impl DependencyGraphBuilder {
    /// Builds the graph of `analysis_id` from its task records.
    ///
    /// Every input is classified, same-run dependencies are checked against
    /// the declared tasks and outputs, and the task order is computed. The
    /// records are not modified.
    pub fn build(analysis_id: &str, records: &[TaskRecord]) -> Result<DependencyGraph, FlowError> {
        let by_id: HashMap<&str, &TaskRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        let tasks: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        let mut bindings = HashMap::with_capacity(records.len());
        let mut producers: HashMap<String, Vec<String>> = HashMap::with_capacity(records.len());
        let mut consumers: HashMap<String, Vec<String>> = HashMap::new();
        let mut edges = Vec::new();

        for record in records {
            let task_node = GraphNode::task(&record.id);
            for output in &record.outputs {
                edges.push((task_node.clone(), GraphNode::output(&record.id, &output.name)));
            }

            let mut upstream: Vec<String> = Vec::new();
            let mut task_bindings = Vec::with_capacity(record.inputs.len());
            for input in &record.inputs {
                let binding = classify_input(analysis_id, &record.id, input)?;
                let input_node = GraphNode::input(&record.id, &input.name);

                if let Some(pointer) = binding.dependency() {
                    let producer = by_id.get(pointer.upstream_task_id.as_str()).ok_or_else(|| {
                        DanglingReferenceError::missing_task(
                            &record.id,
                            &input.name,
                            &pointer.upstream_task_id,
                        )
                    })?;
                    if producer.output(&pointer.output_name).is_none() {
                        return Err(DanglingReferenceError::missing_output(
                            &record.id,
                            &input.name,
                            &pointer.upstream_task_id,
                            &pointer.output_name,
                        )
                        .into());
                    }

                    edges.push((
                        GraphNode::output(&pointer.upstream_task_id, &pointer.output_name),
                        input_node.clone(),
                    ));
                    if !upstream.contains(&pointer.upstream_task_id) {
                        upstream.push(pointer.upstream_task_id.clone());
                    }
                }

                edges.push((input_node, task_node.clone()));
                debug!(
                    analysis_id,
                    task_id = %record.id,
                    input = %input.name,
                    binding = binding.label(),
                    "Classified input"
                );
                task_bindings.push((input.name.clone(), binding));
            }

            for producer in &upstream {
                consumers
                    .entry(producer.clone())
                    .or_default()
                    .push(record.id.clone());
            }
            producers.insert(record.id.clone(), upstream);
            bindings.insert(record.id.clone(), task_bindings);
        }

        let (execution_order, ready_sets) =
            topological_levels(analysis_id, &tasks, &producers, &consumers)?;

        Ok(DependencyGraph {
            analysis_id: analysis_id.to_string(),
            tasks,
            bindings,
            producers,
            consumers,
            edges,
            execution_order,
            ready_sets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, DependencyPointer, InputBinding, InputSpec, OutputSpec, TaskState};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chain() -> Vec<TaskRecord> {
        vec![
            TaskRecord::with_id("t1", "a1", "load")
                .with_input(InputSpec::new(
                    "source",
                    DataType::Dataset,
                    json!({"is_file": true, "bucket": "datasets", "path": "iris.csv"}),
                ))
                .with_output(OutputSpec::new("table", DataType::File)),
            TaskRecord::with_id("t2", "a1", "clean")
                .with_input(InputSpec::depends_on("table", DataType::File, "t1", "table"))
                .with_input(InputSpec::new("k", "int".parse().unwrap(), json!(3)))
                .with_output(OutputSpec::new("model", DataType::Memory("pickle".into()))),
            TaskRecord::with_id("t3", "a1", "report")
                .with_input(InputSpec::depends_on(
                    "model",
                    DataType::Memory("pickle".into()),
                    "t2",
                    "model",
                ))
                .with_output(OutputSpec::new("report", DataType::Dir)),
        ]
    }

    #[test]
    fn test_chain_order() {
        let graph = DependencyGraphBuilder::build("a1", &chain()).unwrap();

        assert_eq!(graph.execution_order(), &["t1", "t2", "t3"]);
        assert_eq!(graph.ready_sets().len(), 3);
        assert_eq!(graph.producers_of("t3"), &["t2"]);
        assert_eq!(graph.consumers_of("t1"), &["t2"]);
    }

    #[test]
    fn test_bindings_are_classified() {
        let graph = DependencyGraphBuilder::build("a1", &chain()).unwrap();

        assert_eq!(graph.binding("t1", "source").unwrap().label(), "DATA_FILE");
        assert_eq!(
            graph.binding("t2", "table"),
            Some(&InputBinding::DependsFile(DependencyPointer::new("t1", "table")))
        );
        assert_eq!(graph.binding("t2", "k"), Some(&InputBinding::FrontData(json!(3))));
        assert_eq!(graph.binding("t3", "model").unwrap().label(), "DEPENDS_MEMORY");
        assert!(graph.binding("t3", "nope").is_none());
    }

    #[test]
    fn test_edges_connect_outputs_inputs_tasks() {
        let graph = DependencyGraphBuilder::build("a1", &chain()).unwrap();
        let edges = graph.edges();

        assert!(edges.contains(&(GraphNode::output("t1", "table"), GraphNode::input("t2", "table"))));
        assert!(edges.contains(&(GraphNode::input("t2", "table"), GraphNode::task("t2"))));
        assert!(edges.contains(&(GraphNode::task("t1"), GraphNode::output("t1", "table"))));
    }

    #[test]
    fn test_siblings_share_a_ready_set() {
        let records = vec![
            TaskRecord::with_id("root", "a1", "load").with_output(OutputSpec::new("out", DataType::File)),
            TaskRecord::with_id("left", "a1", "x")
                .with_input(InputSpec::depends_on("in", DataType::File, "root", "out")),
            TaskRecord::with_id("right", "a1", "y")
                .with_input(InputSpec::depends_on("in", DataType::File, "root", "out")),
        ];
        let graph = DependencyGraphBuilder::build("a1", &records).unwrap();

        assert_eq!(graph.ready_sets()[1], vec!["left".to_string(), "right".to_string()]);

        let mut states = HashMap::new();
        assert_eq!(graph.ready_tasks(&states), vec!["root"]);
        states.insert("root".to_string(), TaskState::Success);
        assert_eq!(graph.ready_tasks(&states), vec!["left", "right"]);
        states.insert("left".to_string(), TaskState::Pending);
        assert_eq!(graph.ready_tasks(&states), vec!["right"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let records = vec![
            TaskRecord::with_id("t1", "a1", "x")
                .with_input(InputSpec::depends_on("in", DataType::File, "t2", "out"))
                .with_output(OutputSpec::new("out", DataType::File)),
            TaskRecord::with_id("t2", "a1", "y")
                .with_input(InputSpec::depends_on("in", DataType::File, "t1", "out"))
                .with_output(OutputSpec::new("out", DataType::File)),
        ];
        let err = DependencyGraphBuilder::build("a1", &records).unwrap_err();
        match err {
            FlowError::GraphCycle(cycle) => assert_eq!(cycle.stuck_tasks, vec!["t1", "t2"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let records = vec![TaskRecord::with_id("t1", "a1", "x")
            .with_input(InputSpec::depends_on("in", DataType::File, "t1", "out"))
            .with_output(OutputSpec::new("out", DataType::File))];
        let err = DependencyGraphBuilder::build("a1", &records).unwrap_err();
        assert_eq!(err.code(), "GRAPH-CYCLE");
    }

    #[test]
    fn test_dangling_references() {
        let missing_task = vec![TaskRecord::with_id("t1", "a1", "x")
            .with_input(InputSpec::depends_on("in", DataType::File, "ghost", "out"))];
        let err = DependencyGraphBuilder::build("a1", &missing_task).unwrap_err();
        assert_eq!(err.code(), "GRAPH-DANGLING");

        let missing_output = vec![
            TaskRecord::with_id("t0", "a1", "x").with_output(OutputSpec::new("real", DataType::File)),
            TaskRecord::with_id("t1", "a1", "x")
                .with_input(InputSpec::depends_on("in", DataType::File, "t0", "imagined")),
        ];
        let err = DependencyGraphBuilder::build("a1", &missing_output).unwrap_err();
        assert!(err.to_string().contains("output 'imagined'"));
    }

    #[test]
    fn test_same_run_marker_creates_edge() {
        let records = vec![
            TaskRecord::with_id("t1", "a1", "x").with_output(OutputSpec::new("out", DataType::File)),
            TaskRecord::with_id("t2", "a1", "y").with_input(InputSpec::new(
                "in",
                DataType::File,
                json!({"is_file": true, "analysis_id": "a1", "task_id": "t1", "output": "out"}),
            )),
        ];
        let graph = DependencyGraphBuilder::build("a1", &records).unwrap();
        assert_eq!(graph.producers_of("t2"), &["t1"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraphBuilder::build("a1", &[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.ready_sets().is_empty());
    }
}
