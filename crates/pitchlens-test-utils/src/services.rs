use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::{ContentIndex, PageFetcher, SearchProvider};
use pitchlens_core::types::{IndexHit, IndexedDocument, SearchHit};

/// Search provider returning a fixed hit list.
#[derive(Default)]
pub struct MockSearch {
    hits: Vec<SearchHit>,
    failure: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, hits: Vec<SearchHit>) -> Self {
        self.hits = hits;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl SearchProvider for MockSearch {
    fn search(&self, query: &str, max_results: usize) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        let query = query.to_string();
        Box::pin(async move {
            self.queries.lock().unwrap().push(query);
            if let Some(msg) = &self.failure {
                return Err(PitchlensError::Search(msg.clone()));
            }
            Ok(self.hits.iter().take(max_results).cloned().collect())
        })
    }
}

/// Page fetcher serving canned pages by URL.
#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl PageFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<String>> {
        let url = url.to_string();
        Box::pin(async move {
            self.fetched.lock().unwrap().push(url.clone());
            self.pages
                .get(&url)
                .cloned()
                .ok_or_else(|| PitchlensError::Fetch {
                    url,
                    message: "HTTP 404 Not Found".to_string(),
                })
        })
    }
}

/// In-memory content index with substring matching.
#[derive(Default)]
pub struct MockIndex {
    docs: Mutex<Vec<IndexedDocument>>,
    failure: Option<String>,
}

impl MockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails with the given message.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn with_document(self, doc: IndexedDocument) -> Self {
        self.docs.lock().unwrap().push(doc);
        self
    }

    pub fn documents(&self) -> Vec<IndexedDocument> {
        self.docs.lock().unwrap().clone()
    }
}

impl ContentIndex for MockIndex {
    fn index(&self, document: IndexedDocument) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(msg) = &self.failure {
                return Err(PitchlensError::Database(msg.clone()));
            }
            let mut docs = self.docs.lock().unwrap();
            docs.retain(|d| d.id != document.id);
            docs.push(document);
            Ok(())
        })
    }

    fn search(&self, query: &str, limit: usize) -> BoxFuture<'_, Result<Vec<IndexHit>>> {
        let words: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(str::to_lowercase)
            .collect();
        Box::pin(async move {
            let docs = self.docs.lock().unwrap();
            Ok(docs
                .iter()
                .filter(|d| {
                    let body = d.body.to_lowercase();
                    words.iter().any(|w| body.contains(w.as_str()))
                })
                .take(limit)
                .map(|d| IndexHit {
                    id: d.id.clone(),
                    title: d.title.clone(),
                    body: d.body.clone(),
                    rank: 0.0,
                    indexed_at: Utc::now(),
                })
                .collect())
        })
    }
}
