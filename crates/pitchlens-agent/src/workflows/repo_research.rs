//! Repository research: fetch a code-hosting page and list its repositories.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::{PageFetcher, StructuredExtractor};
use pitchlens_core::types::{ChatMessage, ExtractionRequest};

use super::{extract_record, Collaborators};
use crate::checkpoint::CheckpointStore;
use crate::graph::{
    CompiledGraph, PassThrough, RunState, Stage, StageContext, StageFlow, StateGraph,
};
use crate::models::{RepositoryList, RepositoryRecord};
use crate::prompts;

pub const GRAPH: &str = "repo_research";
pub const FETCH_REPOSITORIES: &str = "fetch_repositories";
pub const END: &str = "end";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoResearchState {
    pub link: String,
    #[serde(default)]
    pub repositories: Option<Vec<RepositoryRecord>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RepoResearchState {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Default::default()
        }
    }
}

impl RunState for RepoResearchState {
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn error_slot(&mut self) -> &mut Option<String> {
        &mut self.error
    }
}

struct FetchRepositories {
    extractor: Arc<dyn StructuredExtractor>,
    fetcher: Arc<dyn PageFetcher>,
}

impl FetchRepositories {
    async fn fetch(&self, link: &str) -> Result<Vec<RepositoryRecord>> {
        let page = self.fetcher.fetch(link).await?;
        let request = ExtractionRequest::new(prompts::REPOSITORY_EXTRACTION_PROMPT)
            .with_message(ChatMessage::user(page))
            .with_schema(prompts::repositories_schema());
        let list: RepositoryList = extract_record(self.extractor.as_ref(), request).await?;
        Ok(list.repositories)
    }
}

impl Stage<RepoResearchState> for FetchRepositories {
    fn run<'a>(
        &'a self,
        state: &'a mut RepoResearchState,
        _ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            let repositories = self
                .fetch(&state.link)
                .await
                .map_err(|e| PitchlensError::stage("Github scraping", e))?;
            info!(link = %state.link, repositories = repositories.len(), "Repositories extracted");
            state.repositories = Some(repositories);
            Ok(StageFlow::Continue)
        })
    }
}

/// Build the repository research graph.
pub fn build(
    collab: &Collaborators,
    checkpointer: Option<Arc<dyn CheckpointStore<RepoResearchState>>>,
) -> Result<CompiledGraph<RepoResearchState>> {
    let graph = StateGraph::new(GRAPH)
        .register_stage(
            FETCH_REPOSITORIES,
            FetchRepositories {
                extractor: collab.extractor.clone(),
                fetcher: collab.fetcher.clone(),
            },
        )
        .register_stage(END, PassThrough)
        .set_entry(FETCH_REPOSITORIES)
        .set_terminal(END)
        .add_edge(FETCH_REPOSITORIES, END)
        .compile(checkpointer)?;
    Ok(collab.finish(graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RunInput;
    use pitchlens_test_utils::{MockExtractor, MockFetcher, MockReply};
    use serde_json::json;

    fn collab(extractor: MockExtractor, fetcher: MockFetcher) -> Collaborators {
        Collaborators::new(
            Arc::new(extractor),
            Arc::new(pitchlens_tools::ToolRegistry::new()),
            Arc::new(fetcher),
        )
    }

    #[tokio::test]
    async fn extracts_repositories_from_page() {
        let extractor = MockExtractor::new().on(
            "repositories",
            MockReply::record(json!({"repositories": [
                {"repository": "engine", "stars": "1200", "forks": "80", "link": "https://github.com/acme/engine"}
            ]})),
        );
        let fetcher = MockFetcher::new().with_page("https://github.com/acme", "## Pinned\nengine 1.2k stars");
        let graph = build(&collab(extractor, fetcher), None).unwrap();

        let out = graph
            .ainvoke(RunInput::Fresh(RepoResearchState::new("https://github.com/acme")), None)
            .await
            .unwrap();
        assert!(out.error.is_none());
        let repos = out.repositories.unwrap();
        assert_eq!(repos[0].repository, "engine");
        assert_eq!(repos[0].stars.as_deref(), Some("1200"));
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded() {
        let extractor = Arc::new(MockExtractor::new());
        let collab = Collaborators::new(
            extractor.clone(),
            Arc::new(pitchlens_tools::ToolRegistry::new()),
            Arc::new(MockFetcher::new()),
        );
        let graph = build(&collab, None).unwrap();

        let out = graph
            .ainvoke(RunInput::Fresh(RepoResearchState::new("https://github.com/ghost")), None)
            .await
            .unwrap();
        let error = out.error.unwrap();
        assert!(error.starts_with("Github scraping failed: Fetch failed"), "{error}");
        assert!(out.repositories.is_none());
        assert!(extractor.requests().is_empty());
    }
}
