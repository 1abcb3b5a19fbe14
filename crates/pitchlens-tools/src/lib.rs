pub mod builtin;
pub mod providers;
pub mod registry;

pub use builtin::web_search::WebSearchTool;
pub use providers::http_fetch::HttpFetcher;
pub use providers::tavily::TavilySearch;
pub use registry::ToolRegistry;
