//! Tool catalog port: maps a task's tool to the remote function running it.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

/// How the remote runtime starts the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    /// Module or script the runtime loads.
    pub entry_point: String,
    /// Function called inside the entry point.
    pub handler: String,
}

impl LaunchDescriptor {
    /// Creates a launch descriptor.
    #[must_use]
    pub fn new(entry_point: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            handler: handler.into(),
        }
    }
}

/// Catalog metadata of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Tool id referenced by task records.
    pub tool_id: String,
    /// Remote function deployed for the tool.
    pub function_id: String,
    /// Launch descriptor.
    pub launch: LaunchDescriptor,
}

impl ToolMetadata {
    /// Creates tool metadata.
    #[must_use]
    pub fn new(
        tool_id: impl Into<String>,
        function_id: impl Into<String>,
        launch: LaunchDescriptor,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            function_id: function_id.into(),
            launch,
        }
    }
}

/// Lookup of tool metadata.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Returns the metadata of a tool, if it is known.
    async fn get_tool(&self, tool_id: &str) -> Result<Option<ToolMetadata>, FlowError>;
}

/// In-memory tool catalog.
#[derive(Debug, Default)]
pub struct InMemoryToolCatalog {
    tools: DashMap<String, ToolMetadata>,
}

impl InMemoryToolCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    pub fn register(&self, tool: ToolMetadata) {
        self.tools.insert(tool.tool_id.clone(), tool);
    }

    /// Registers a tool, builder style.
    #[must_use]
    pub fn with_tool(self, tool: ToolMetadata) -> Self {
        self.register(tool);
        self
    }
}

#[async_trait]
impl ToolCatalog for InMemoryToolCatalog {
    async fn get_tool(&self, tool_id: &str) -> Result<Option<ToolMetadata>, FlowError> {
        Ok(self.tools.get(tool_id).map(|t| t.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_lookup() {
        let catalog = InMemoryToolCatalog::new().with_tool(ToolMetadata::new(
            "clean",
            "fn-clean",
            LaunchDescriptor::new("main.py", "handler"),
        ));

        let tool = catalog.get_tool("clean").await.unwrap().unwrap();
        assert_eq!(tool.function_id, "fn-clean");
        assert!(catalog.get_tool("missing").await.unwrap().is_none());
    }
}
