//! The analysis workflows, each a [`CompiledGraph`](crate::graph::CompiledGraph)
//! over its own run state.

pub mod market_research;
pub mod qa;
pub mod repo_research;
pub mod slide_analysis;
pub mod supervisor;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use pitchlens_core::config::WorkflowConfig;
use pitchlens_core::error::Result;
use pitchlens_core::event::EventBus;
use pitchlens_core::traits::{ContentIndex, PageFetcher, StructuredExtractor};
use pitchlens_core::types::ExtractionRequest;
use pitchlens_tools::ToolRegistry;

use crate::fanout::FanOut;
use crate::graph::{CompiledGraph, RunState, DEFAULT_RECURSION_LIMIT};

/// External capabilities shared by every workflow.
#[derive(Clone)]
pub struct Collaborators {
    /// Text extraction: summaries, scoring, research, repository facts.
    pub extractor: Arc<dyn StructuredExtractor>,
    /// Slide image extraction.
    pub vision: Arc<dyn StructuredExtractor>,
    pub tools: Arc<ToolRegistry>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub index: Option<Arc<dyn ContentIndex>>,
    pub fan_out: FanOut,
    pub recursion_limit: usize,
    pub events: Option<Arc<EventBus>>,
}

impl Collaborators {
    pub fn new(
        extractor: Arc<dyn StructuredExtractor>,
        tools: Arc<ToolRegistry>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            vision: extractor.clone(),
            extractor,
            tools,
            fetcher,
            index: None,
            fan_out: FanOut::from_config(&WorkflowConfig::default()),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            events: None,
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn StructuredExtractor>) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn ContentIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Apply the `[workflow]` section: recursion limit and fan-out sizing.
    pub fn with_workflow_config(mut self, config: &WorkflowConfig) -> Self {
        self.fan_out = FanOut::from_config(config);
        self.recursion_limit = config.recursion_limit;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Apply run limits and event publishing to a freshly compiled graph.
    pub(crate) fn finish<S: RunState>(&self, graph: CompiledGraph<S>) -> CompiledGraph<S> {
        let graph = graph.with_recursion_limit(self.recursion_limit);
        match &self.events {
            Some(bus) => graph.with_events(bus.clone()),
            None => graph,
        }
    }
}

/// Run one extraction and decode its structured record.
pub(crate) async fn extract_record<T: DeserializeOwned>(
    extractor: &dyn StructuredExtractor,
    request: ExtractionRequest,
) -> Result<T> {
    extractor.extract(request).await?.into_structured()
}
