//! The dependency graph of one analysis and its scheduling queries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::core::{InputBinding, TaskState};
use crate::errors::{FlowError, GraphCycleError};
use crate::store::RecordStore;

use super::DependencyGraphBuilder;

/// A node of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum GraphNode {
    /// A task.
    Task {
        /// Task id.
        task_id: String,
    },
    /// A declared input of a task.
    Input {
        /// Owning task.
        task_id: String,
        /// Input name.
        name: String,
    },
    /// A declared output of a task.
    Output {
        /// Owning task.
        task_id: String,
        /// Output name.
        name: String,
    },
}

impl GraphNode {
    pub(crate) fn task(task_id: &str) -> Self {
        Self::Task {
            task_id: task_id.to_string(),
        }
    }

    pub(crate) fn input(task_id: &str, name: &str) -> Self {
        Self::Input {
            task_id: task_id.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn output(task_id: &str, name: &str) -> Self {
        Self::Output {
            task_id: task_id.to_string(),
            name: name.to_string(),
        }
    }
}

/// Typed dependency graph of an analysis.
///
/// Built from the task records, never persisted. Every task input carries
/// its [`InputBinding`], decided once when the graph was built.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub(crate) analysis_id: String,
    /// Task ids in record order.
    pub(crate) tasks: Vec<String>,
    pub(crate) bindings: HashMap<String, Vec<(String, InputBinding)>>,
    /// Distinct upstream tasks per task, in first-seen order.
    pub(crate) producers: HashMap<String, Vec<String>>,
    /// Distinct downstream tasks per task, in record order.
    pub(crate) consumers: HashMap<String, Vec<String>>,
    pub(crate) edges: Vec<(GraphNode, GraphNode)>,
    pub(crate) execution_order: Vec<String>,
    pub(crate) ready_sets: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Loads the tasks of an analysis from a record store and builds their graph.
    pub async fn from_store(
        records: &dyn RecordStore,
        analysis_id: &str,
    ) -> Result<Self, FlowError> {
        let tasks = records.tasks_of(analysis_id).await?;
        DependencyGraphBuilder::build(analysis_id, &tasks)
    }

    /// Returns the analysis id.
    #[must_use]
    pub fn analysis_id(&self) -> &str {
        &self.analysis_id
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns true if the task belongs to the graph.
    #[must_use]
    pub fn contains(&self, task_id: &str) -> bool {
        self.producers.contains_key(task_id)
    }

    /// Returns all task ids in topological order, ties broken by record order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns the tasks grouped in levels; every producer of a task sits in
    /// an earlier level.
    #[must_use]
    pub fn ready_sets(&self) -> &[Vec<String>] {
        &self.ready_sets
    }

    /// Returns READY tasks whose producers have all succeeded, in record order.
    ///
    /// Tasks missing from `states` are treated as READY.
    #[must_use]
    pub fn ready_tasks(&self, states: &HashMap<String, TaskState>) -> Vec<String> {
        let state_of = |id: &str| states.get(id).copied().unwrap_or_default();
        self.tasks
            .iter()
            .filter(|id| state_of(id) == TaskState::Ready)
            .filter(|id| {
                self.producers_of(id)
                    .iter()
                    .all(|p| state_of(p) == TaskState::Success)
            })
            .cloned()
            .collect()
    }

    /// Returns the distinct tasks feeding `task_id`.
    #[must_use]
    pub fn producers_of(&self, task_id: &str) -> &[String] {
        self.producers.get(task_id).map_or(&[], Vec::as_slice)
    }

    /// Returns the distinct tasks fed by `task_id`.
    #[must_use]
    pub fn consumers_of(&self, task_id: &str) -> &[String] {
        self.consumers.get(task_id).map_or(&[], Vec::as_slice)
    }

    /// Returns the binding of one input.
    #[must_use]
    pub fn binding(&self, task_id: &str, input: &str) -> Option<&InputBinding> {
        self.bindings
            .get(task_id)?
            .iter()
            .find(|(name, _)| name == input)
            .map(|(_, binding)| binding)
    }

    /// Returns the bindings of a task's inputs, in declaration order.
    #[must_use]
    pub fn bindings_of(&self, task_id: &str) -> &[(String, InputBinding)] {
        self.bindings.get(task_id).map_or(&[], Vec::as_slice)
    }

    /// Returns all edges of the typed node graph.
    #[must_use]
    pub fn edges(&self) -> &[(GraphNode, GraphNode)] {
        &self.edges
    }
}

/// Kahn's algorithm over task-level dependencies.
///
/// Among ready tasks the one earliest in record order goes first, which keeps
/// the order stable across runs. Returns the order and the levels, or the
/// tasks left with unresolved in-degree.
pub(crate) fn topological_levels(
    analysis_id: &str,
    tasks: &[String],
    producers: &HashMap<String, Vec<String>>,
    consumers: &HashMap<String, Vec<String>>,
) -> Result<(Vec<String>, Vec<Vec<String>>), GraphCycleError> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut in_degree: Vec<usize> = tasks
        .iter()
        .map(|id| producers.get(id).map_or(0, Vec::len))
        .collect();
    let mut level = vec![0usize; tasks.len()];
    let mut ready: BTreeSet<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for consumer in consumers.get(&tasks[current]).into_iter().flatten() {
            let Some(&c) = index.get(consumer.as_str()) else {
                continue;
            };
            level[c] = level[c].max(level[current] + 1);
            in_degree[c] -= 1;
            if in_degree[c] == 0 {
                ready.insert(c);
            }
        }
    }

    if order.len() < tasks.len() {
        let stuck = (0..tasks.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| tasks[i].clone())
            .collect();
        return Err(GraphCycleError::new(analysis_id, stuck));
    }

    let depth = level.iter().copied().max().map_or(0, |max| max + 1);
    let mut levels = vec![Vec::new(); depth];
    for &i in &order {
        levels[level[i]].push(i);
    }
    for group in &mut levels {
        group.sort_unstable();
    }

    let names = |ids: &[usize]| ids.iter().map(|&i| tasks[i].clone()).collect::<Vec<_>>();
    let levels = levels.iter().map(|group| names(group.as_slice())).collect();
    Ok((names(order.as_slice()), levels))
}
