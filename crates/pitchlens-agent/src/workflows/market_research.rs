//! Market research: an analysis stage that may loop through web searches
//! before it settles on sector, market size and competitors.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::StructuredExtractor;
use pitchlens_core::types::{ChatMessage, Extraction, ExtractionRequest, ToolCall, ToolContext};
use pitchlens_tools::ToolRegistry;

use super::Collaborators;
use crate::checkpoint::CheckpointStore;
use crate::graph::{
    halt_on_error, CompiledGraph, PassThrough, Route, RunState, Stage, StageContext, StageFlow,
    StateGraph,
};
use crate::models::{
    CompanyOverview, CompetitorInfo, DeckSummary, MarketReport, MarketSizeInfo, SectorInfo,
};
use crate::prompts;

pub const GRAPH: &str = "market_research";
pub const RESEARCH: &str = "research";
pub const TOOLS: &str = "tools";
pub const END: &str = "end";

/// What the research starts from: a full deck summary from slide analysis,
/// or a bare company overview supplied by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchSubject {
    Summary(DeckSummary),
    Overview(CompanyOverview),
}

impl Default for ResearchSubject {
    fn default() -> Self {
        Self::Overview(CompanyOverview::default())
    }
}

impl ResearchSubject {
    fn to_message(&self) -> Result<String> {
        Ok(match self {
            Self::Summary(summary) => format!(
                "Pitch deck summary:\n{}",
                serde_json::to_string_pretty(summary)?
            ),
            Self::Overview(overview) => format!(
                "Company overview:\n{}",
                serde_json::to_string_pretty(overview)?
            ),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketResearchState {
    pub subject: ResearchSubject,
    /// Conversation with the extractor, including tool exchanges.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub sector: Option<SectorInfo>,
    #[serde(default)]
    pub market_size: Option<MarketSizeInfo>,
    #[serde(default)]
    pub competitors: Option<Vec<CompetitorInfo>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MarketResearchState {
    pub fn new(overview: CompanyOverview) -> Self {
        Self {
            subject: ResearchSubject::Overview(overview),
            ..Default::default()
        }
    }

    pub fn from_summary(summary: DeckSummary) -> Self {
        Self {
            subject: ResearchSubject::Summary(summary),
            ..Default::default()
        }
    }

    pub fn needs_tools(&self) -> bool {
        !self.pending_tool_calls.is_empty()
    }
}

impl RunState for MarketResearchState {
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn error_slot(&mut self) -> &mut Option<String> {
        &mut self.error
    }
}

/// After research: tools while calls are pending, otherwise done.
pub fn route_after_research(state: &MarketResearchState) -> Route {
    match halt_on_error(state) {
        Route::Next if state.needs_tools() => Route::Next,
        Route::Next => Route::Finish,
        halted => halted,
    }
}

struct Research {
    extractor: Arc<dyn StructuredExtractor>,
    tools: Arc<ToolRegistry>,
}

impl Research {
    async fn research(&self, state: &mut MarketResearchState) -> Result<()> {
        if state.messages.is_empty() {
            let subject = state.subject.to_message()?;
            state.messages.push(ChatMessage::user(subject));
        }

        let request = ExtractionRequest::new(prompts::MARKET_RESEARCH_PROMPT)
            .with_messages(state.messages.clone())
            .with_schema(prompts::market_report_schema())
            .with_tools(self.tools.definitions());

        match self.extractor.extract(request).await? {
            Extraction::ToolCalls(calls) => {
                debug!(calls = calls.len(), "Research requested tool calls");
                state.messages.push(ChatMessage::tool_calls(&calls));
                state.pending_tool_calls = calls;
            }
            record @ Extraction::Structured(_) => {
                let report: MarketReport = record.into_structured()?;
                info!(
                    sector = %report.sector.name,
                    competitors = report.competitors.len(),
                    "Market research complete"
                );
                state.pending_tool_calls.clear();
                state.sector = Some(report.sector);
                state.market_size = Some(report.market_size);
                state.competitors = Some(report.competitors);
            }
        }
        Ok(())
    }
}

impl Stage<MarketResearchState> for Research {
    fn run<'a>(
        &'a self,
        state: &'a mut MarketResearchState,
        _ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.research(state)
                .await
                .map_err(|e| PitchlensError::stage("Market Research", e))?;
            Ok(StageFlow::Continue)
        })
    }
}

/// Runs pending tool calls and feeds their results back into the conversation.
struct RunTools {
    tools: Arc<ToolRegistry>,
}

impl Stage<MarketResearchState> for RunTools {
    fn run<'a>(
        &'a self,
        state: &'a mut MarketResearchState,
        ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            let calls = std::mem::take(&mut state.pending_tool_calls);
            let tool_ctx = ToolContext {
                run_id: ctx.run_id.clone(),
            };
            let results = join_all(
                calls
                    .iter()
                    .map(|call| self.tools.dispatch(call, tool_ctx.clone())),
            )
            .await;

            for (call, result) in calls.iter().zip(results) {
                state
                    .messages
                    .push(ChatMessage::tool_result(call.id.as_str(), result));
            }
            debug!(calls = calls.len(), "Tool calls executed");
            Ok(StageFlow::Continue)
        })
    }
}

/// Build the market research graph.
pub fn build(
    collab: &Collaborators,
    checkpointer: Option<Arc<dyn CheckpointStore<MarketResearchState>>>,
) -> Result<CompiledGraph<MarketResearchState>> {
    let graph = StateGraph::new(GRAPH)
        .register_stage(
            RESEARCH,
            Research {
                extractor: collab.extractor.clone(),
                tools: collab.tools.clone(),
            },
        )
        .register_stage(
            TOOLS,
            RunTools {
                tools: collab.tools.clone(),
            },
        )
        .register_stage(END, PassThrough)
        .set_entry(RESEARCH)
        .set_terminal(END)
        .add_conditional_edge(RESEARCH, route_after_research, TOOLS)
        .add_edge(TOOLS, RESEARCH)
        .compile(checkpointer)?;
    Ok(collab.finish(graph))
}
