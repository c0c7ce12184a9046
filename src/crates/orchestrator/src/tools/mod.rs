//! Tools callable from plan tasks
//!
//! A tool is a named async capability taking a JSON object of parameters
//! and returning a JSON value. The planner sees every registered tool
//! through [`ToolRegistry::describe`].
//!
//! Built-in tools:
//!
//! - [`SearchTool`] (`search_tool`) - web search through a [`WebSearch`] backend
//! - [`FluxTool`] (`flux_tool`) - queues text-to-image work on an [`ImageQueue`]
//! - [`MockWeatherTool`] (`mock_weather`) - deterministic weather for testing

pub mod flux;
pub mod search;
pub mod weather;

pub use flux::{FluxTool, ImageQueue, InMemoryImageQueue, QueuedImageJob};
pub use search::{SearchHit, SearchTool, WebSearch};
pub use weather::MockWeatherTool;

use crate::{OrchestratorError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tool input type
pub type ToolInput = Value;

/// Tool output type
pub type ToolOutput = Value;

/// Tool trait for task execution
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name used in plans (`tool_name`)
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters
    fn input_schema(&self) -> Value;

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput>;
}

/// Tool metadata
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool registry, populated at startup
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, for stable prompt rendering
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name.clone());
        }
        debug!(tool = %name, "Registered tool");
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_metadata(&self) -> Vec<ToolMetadata> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolMetadata {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// One line per tool, rendered into the planner's system prompt
    pub fn describe(&self) -> String {
        if self.tools.is_empty() {
            return "(no tools available)".to_string();
        }
        self.list_metadata()
            .into_iter()
            .map(|meta| {
                format!(
                    "- {}: {} Parameters: {}",
                    meta.name, meta.description, meta.input_schema
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, input: ToolInput) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| OrchestratorError::Tool(format!("Tool not found: {}", name)))?;
        tool.execute(input).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

/// Read a required string parameter
pub(crate) fn required_str<'a>(input: &'a ToolInput, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OrchestratorError::Tool(format!("invalid request: missing parameter '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input."
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, input: ToolInput) -> Result<ToolOutput> {
            Ok(json!({"echo": input}))
        }
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool));
        let output = registry.execute("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(output["echo"]["a"], 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Tool not found"));
    }

    #[test]
    fn test_describe_keeps_registration_order() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(MockWeatherTool))
            .with_tool(Arc::new(EchoTool));
        let described = registry.describe();
        let weather = described.find("mock_weather").unwrap();
        let echo = described.find("- echo").unwrap();
        assert!(weather < echo);
        assert_eq!(registry.names(), vec!["mock_weather", "echo"]);
    }

    #[test]
    fn test_required_str() {
        let input = json!({"query": "  rust  ", "blank": " "});
        assert_eq!(required_str(&input, "query").unwrap(), "rust");
        assert!(required_str(&input, "blank").is_err());
        assert!(required_str(&input, "missing").is_err());
    }
}
