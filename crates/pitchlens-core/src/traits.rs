use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Structured extractor: turns text or image input into a record matching a
/// schema, or asks for tool calls first.
pub trait StructuredExtractor: Send + Sync + 'static {
    fn extract(&self, request: ExtractionRequest) -> BoxFuture<'_, Result<Extraction>>;
}

/// Tool offered to an extractor during a research loop.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Web search backend.
pub trait SearchProvider: Send + Sync + 'static {
    fn search(&self, query: &str, max_results: usize) -> BoxFuture<'_, Result<Vec<SearchHit>>>;
}

/// Fetches a page and returns its readable text.
pub trait PageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<String>>;
}

/// Searchable store for composed summaries.
pub trait ContentIndex: Send + Sync + 'static {
    fn index(&self, document: IndexedDocument) -> BoxFuture<'_, Result<()>>;

    /// Full-text search across indexed documents.
    fn search(&self, query: &str, limit: usize) -> BoxFuture<'_, Result<Vec<IndexHit>>>;
}
