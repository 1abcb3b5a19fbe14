use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::{SearchProvider, Tool};
use pitchlens_core::types::{ToolContext, ToolResult};

/// `web_search` tool offered to the market-research loop.
///
/// Results are returned as a JSON array of `{result_text, source_link}` so the
/// model can cite the link it used.
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    default_max_results: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, default_max_results: usize) -> Self {
        Self {
            provider,
            default_max_results,
        }
    }
}

impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information about markets, sectors, and competitors. \
         Returns result snippets with their source links."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 3)",
                    "default": 3
                }
            },
            "required": ["query"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let query = input["query"]
                .as_str()
                .ok_or_else(|| PitchlensError::ToolValidation("'query' must be a string".into()))?;
            let max = input["max_results"]
                .as_u64()
                .map(|n| n as usize)
                .unwrap_or(self.default_max_results);

            let hits = self
                .provider
                .search(query, max)
                .await
                .map_err(|e| PitchlensError::ToolExecution {
                    tool: "web_search".into(),
                    message: e.to_string(),
                })?;

            if hits.is_empty() {
                return Ok(ToolResult::success("No results found."));
            }
            Ok(ToolResult::success(serde_json::to_string(&hits)?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchlens_core::types::{RunId, SearchHit};
    use pitchlens_test_utils::MockSearch;

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: RunId::from_str("test"),
        }
    }

    #[tokio::test]
    async fn returns_hits_as_json() {
        let search = Arc::new(MockSearch::new().with_hits(vec![SearchHit {
            content: "Fintech TAM is $300B".into(),
            url: "https://example.com/fintech".into(),
        }]));
        let tool = WebSearchTool::new(search.clone(), 3);
        let result = tool
            .execute(json!({"query": "fintech market size"}), ctx())
            .await
            .unwrap();
        assert!(!result.is_error);
        let hits: Vec<serde_json::Value> = serde_json::from_str(&result.content).unwrap();
        assert_eq!(hits[0]["source_link"], "https://example.com/fintech");
        assert_eq!(search.queries(), vec!["fintech market size".to_string()]);
    }

    #[tokio::test]
    async fn missing_query_is_validation_error() {
        let tool = WebSearchTool::new(Arc::new(MockSearch::new()), 3);
        let err = tool.execute(json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, PitchlensError::ToolValidation(_)));
    }

    #[tokio::test]
    async fn empty_results_are_reported() {
        let tool = WebSearchTool::new(Arc::new(MockSearch::new()), 3);
        let result = tool.execute(json!({"query": "x"}), ctx()).await.unwrap();
        assert_eq!(result.content, "No results found.");
    }
}
