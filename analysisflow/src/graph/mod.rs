//! Dependency graph of an analysis's tasks.
//!
//! The graph has three node kinds: tasks, task inputs and task outputs.
//! Edges run from a producer's output to the consuming input, from an input
//! to its task, and from a task to its outputs. Scheduling works on the
//! task-level projection of these edges.

mod builder;
mod dag;

pub use builder::DependencyGraphBuilder;
pub use dag::{DependencyGraph, GraphNode};
