pub mod http_fetch;
pub mod tavily;
