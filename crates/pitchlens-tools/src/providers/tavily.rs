use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::SearchProvider;
use pitchlens_core::types::SearchHit;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Tavily web search.
pub struct TavilySearch {
    api_key: String,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

fn parse_results(body: &serde_json::Value) -> Vec<SearchHit> {
    body["results"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|r| SearchHit {
                    content: r["content"].as_str().unwrap_or("").to_string(),
                    url: r["url"].as_str().unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl SearchProvider for TavilySearch {
    fn search(&self, query: &str, max_results: usize) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        let query = query.to_string();
        Box::pin(async move {
            debug!(query = %query, max_results, "Tavily search");

            let resp = self
                .http
                .post(TAVILY_API_URL)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": max_results,
                }))
                .send()
                .await
                .map_err(|e| PitchlensError::Search(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(PitchlensError::Search(format!("HTTP {}: {}", status, text)));
            }

            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| PitchlensError::Search(e.to_string()))?;

            Ok(parse_results(&body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_tavily_results() {
        let body = json!({
            "results": [
                {"title": "A", "url": "https://a.example", "content": "alpha"},
                {"title": "B", "url": "https://b.example", "content": "beta"}
            ]
        });
        let hits = parse_results(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].content, "beta");
        assert_eq!(hits[1].url, "https://b.example");
    }

    #[test]
    fn missing_results_is_empty() {
        assert!(parse_results(&json!({"answer": null})).is_empty());
    }
}
