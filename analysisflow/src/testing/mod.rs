//! Testing utilities for analysisflow.
//!
//! This module provides:
//! - A fully wired in-memory flow harness
//! - Recording and failing collaborators
//! - Assertions over analysis status snapshots

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_analysis_state, assert_event_order, assert_task_state};
pub use fixtures::{
    chain_tasks, function_for, test_config, FlowHarness, TEST_BALANCE, TEST_USER,
};
pub use mocks::{FailingRecordStore, RecordedInvocation, RecordingGateway};
