//! Mocks for the collaborator traits in `pitchlens-core`.

mod extractor;
mod services;

pub use extractor::{MockExtractor, MockReply};
pub use services::{MockFetcher, MockIndex, MockSearch};

use pitchlens_core::types::ToolCall;

/// A `web_search` tool call with the given id and query.
pub fn search_call(id: &str, query: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "web_search".to_string(),
        input: serde_json::json!({ "query": query }),
    }
}
