//! Agent tools that run against the session's dataset
//!
//! - `run_dataframe_query`: SQL over table `df`, returns a table
//! - `plot_chart`: SQL plus a chart spec, returns an SVG image

mod chart;
mod query;

pub use chart::PlotChartTool;
pub use query::RunDataframeQueryTool;

use crate::data::{Chart, Table};
use crate::llm::ToolDefinition;
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// A displayable result produced by a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Artifact {
    Table { table: Table, truncated: bool },
    Image { chart: Chart },
}

/// Result of executing a tool
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    /// Observation handed back to the model
    pub output: String,
    pub artifact: Option<Artifact>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            artifact: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// Trait for agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value) -> Result<ToolResult>;

    /// Convert to LLM tool definition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    tool_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(tool_timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            tool_timeout,
        }
    }

    /// Register a tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        tracing::debug!(tool = tool.name(), "Registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool by name
    ///
    /// Never fails: unknown tools, errors, panics and timeouts all come back
    /// as error results the model can read and recover from.
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::error(format!(
                "Unknown tool: {}. Available tools: {}",
                name,
                self.names().join(", ")
            ));
        };

        // Wrap tool execution with timeout + panic recovery to prevent crashes
        match timeout(
            self.tool_timeout,
            AssertUnwindSafe(tool.execute(params)).catch_unwind(),
        )
        .await
        {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                tracing::debug!(tool = name, error = %e, "Tool returned an error");
                ToolResult::error(format!("Error: {:#}", e))
            }
            Ok(Err(panic_info)) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!("Tool '{}' panicked: {}", name, panic_msg);
                ToolResult::error(format!("Error: tool '{}' crashed: {}", name, panic_msg))
            }
            Err(_) => {
                tracing::warn!(tool = name, timeout = ?self.tool_timeout, "Tool timed out");
                ToolResult::error(format!(
                    "Error: tool '{}' timed out after {:?}",
                    name, self.tool_timeout
                ))
            }
        }
    }
}

/// Read a required string parameter
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing required parameter '{}'", key))
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
            "Echo the input"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, params: Value) -> Result<ToolResult> {
            Ok(ToolResult::success(required_str(&params, "text")?))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value) -> Result<ToolResult> {
            panic!("boom")
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success("done"))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new(Duration::from_millis(100));
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(PanicTool));
        registry.register(Arc::new(SlowTool));
        registry
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = registry().execute("echo", json!({"text": "hi"})).await;
        assert!(result.success);
        assert_eq!(result.output, "hi");
    }

    #[tokio::test]
    async fn test_tool_error_becomes_result() {
        let result = registry().execute("echo", json!({})).await;
        assert!(!result.success);
        assert!(result.output.contains("missing required parameter 'text'"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let result = registry().execute("rm_rf", json!({})).await;
        assert!(!result.success);
        assert!(result.output.contains("Unknown tool: rm_rf"));
        assert!(result.output.contains("echo"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let result = registry().execute("panic", json!({})).await;
        assert!(!result.success);
        assert!(result.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = registry().execute("slow", json!({})).await;
        assert!(!result.success);
        assert!(result.output.contains("timed out after 100ms"));
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        let names: Vec<String> = registry()
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["echo", "panic", "slow"]);
    }
}
