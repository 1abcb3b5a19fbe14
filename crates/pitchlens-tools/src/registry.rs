use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::{SearchProvider, Tool};
use pitchlens_core::types::{ToolCall, ToolContext, ToolDefinition, ToolResult};

use crate::builtin::web_search::WebSearchTool;

/// Registry of tools offered to an extractor.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get tool definitions for sending to the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| PitchlensError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(PitchlensError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Execute a requested tool call; failures come back as error results
    /// so the model can see them.
    pub async fn dispatch(&self, call: &ToolCall, ctx: ToolContext) -> ToolResult {
        debug!(tool = %call.name, id = %call.id, "Dispatching tool call");
        match self.execute(&call.name, call.input.clone(), ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                ToolResult::error(e.to_string())
            }
        }
    }

    /// Registry with the tools the research workflows use.
    pub fn for_research(search: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        let mut registry = Self::new();
        registry.register(WebSearchTool::new(search, max_results));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use pitchlens_core::types::RunId;
    use pitchlens_test_utils::MockSearch;
    use serde_json::json;

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(ToolResult::success("late"))
            })
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: RunId::from_str("r"),
        }
    }

    #[test]
    fn research_registry_offers_web_search() {
        let registry = ToolRegistry::for_research(Arc::new(MockSearch::new()), 3);
        assert_eq!(registry.list(), vec!["web_search"]);
        assert_eq!(registry.definitions()[0].name, "web_search");
    }

    #[tokio::test]
    async fn unknown_tool_is_error() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, PitchlensError::ToolNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let err = registry.execute("slow", json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, PitchlensError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn dispatch_turns_failures_into_error_results() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "c1".into(),
            name: "missing".into(),
            input: json!({}),
        };
        let result = registry.dispatch(&call, ctx()).await;
        assert!(result.is_error);
        assert!(result.content.contains("missing"));
    }
}
