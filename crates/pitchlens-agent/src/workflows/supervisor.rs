//! Supervisor: runs slide analysis, market research and repository research
//! in sequence, each as an opaque sub-workflow.
//!
//! A sub-workflow that ends with an error hands that message up unchanged;
//! it then drains the supervisor like any native stage failure. Unlike the
//! sub-workflows, the supervisor's terminal turns a present error into
//! [`PitchlensError::RunFailed`].

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pitchlens_core::error::{PitchlensError, Result};

use super::market_research::{self, MarketResearchState};
use super::repo_research::{self, RepoResearchState};
use super::slide_analysis::{self, SlideAnalysisState};
use super::Collaborators;
use crate::checkpoint::CheckpointStore;
use crate::classify::{find_repository_url, is_technology_company};
use crate::graph::{
    halt_on_error, CompiledGraph, FnStage, RunInput, RunState, Stage, StageContext, StageFlow,
    StateGraph,
};
use crate::models::{
    CompanyOverview, CompetitorInfo, DeckSummary, FounderMarketFit, MarketSizeInfo,
    MarketSizingGrowth, RepositoryRecord, ScoreEntry, SectorInfo, SlideContent, SlideRecord,
    Traction,
};

pub const GRAPH: &str = "supervisor";
pub const PITCH_DECK_ANALYSIS: &str = "pitch_deck_analysis";
pub const MARKET_ANALYSIS: &str = "market_analysis";
pub const GITHUB_ANALYSIS: &str = "github_analysis";
pub const END: &str = "end";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorState {
    pub slides: Vec<SlideRecord>,
    #[serde(default)]
    pub summary: Option<DeckSummary>,
    #[serde(default)]
    pub scorecard: Option<Vec<ScoreEntry>>,
    #[serde(default)]
    pub slide_content: Option<Vec<SlideContent>>,
    #[serde(default)]
    pub sector: Option<SectorInfo>,
    #[serde(default)]
    pub market_size: Option<MarketSizeInfo>,
    #[serde(default)]
    pub competitors: Option<Vec<CompetitorInfo>>,
    /// First repository URL found in the summary.
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(default)]
    pub github_details: Option<Vec<RepositoryRecord>>,
    /// Derived from the summary text, never supplied by the caller.
    #[serde(default)]
    pub is_tech_company: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl SupervisorState {
    pub fn new(slides: Vec<SlideRecord>) -> Self {
        Self {
            slides,
            ..Default::default()
        }
    }
}

impl RunState for SupervisorState {
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn error_slot(&mut self) -> &mut Option<String> {
        &mut self.error
    }
}

struct PitchDeckAnalysis {
    graph: Arc<CompiledGraph<SlideAnalysisState>>,
}

impl PitchDeckAnalysis {
    async fn analyze(&self, state: &mut SupervisorState, ctx: &StageContext) -> Result<()> {
        let result = self
            .graph
            .ainvoke(
                RunInput::Fresh(SlideAnalysisState::new(state.slides.clone())),
                Some(ctx.run_id.clone()),
            )
            .await?;

        if let Some(error) = result.error {
            state.record_error(error);
            return Ok(());
        }

        let summary = result.summary.ok_or_else(|| {
            PitchlensError::Precondition("slide analysis returned no summary".into())
        })?;
        let text = summary.values_text();
        state.is_tech_company = is_technology_company(&text);
        state.github_url = find_repository_url(&text);
        info!(
            is_tech_company = state.is_tech_company,
            github_url = state.github_url.as_deref().unwrap_or("none"),
            "Pitch deck analyzed"
        );

        state.slides = result.slides;
        state.summary = Some(summary);
        state.scorecard = result.scorecard;
        state.slide_content = Some(result.slide_content.unwrap_or_default());
        Ok(())
    }
}

impl Stage<SupervisorState> for PitchDeckAnalysis {
    fn run<'a>(
        &'a self,
        state: &'a mut SupervisorState,
        ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.analyze(state, &ctx)
                .await
                .map_err(|e| PitchlensError::stage("Pitch deck analysis", e))?;
            Ok(StageFlow::Continue)
        })
    }
}

struct MarketAnalysis {
    graph: Arc<CompiledGraph<MarketResearchState>>,
}

impl MarketAnalysis {
    async fn analyze(&self, state: &mut SupervisorState, ctx: &StageContext) -> Result<()> {
        let summary = state.summary.as_ref().ok_or_else(|| {
            PitchlensError::Precondition(
                "No pitch deck summary available for market analysis".into(),
            )
        })?;

        let result = self
            .graph
            .ainvoke(
                RunInput::Fresh(MarketResearchState::from_summary(summary.clone())),
                Some(ctx.run_id.clone()),
            )
            .await?;

        if let Some(error) = result.error {
            state.record_error(error);
            return Ok(());
        }

        state.sector = result.sector;
        state.market_size = result.market_size;
        state.competitors = result.competitors;
        Ok(())
    }
}

impl Stage<SupervisorState> for MarketAnalysis {
    fn run<'a>(
        &'a self,
        state: &'a mut SupervisorState,
        ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.analyze(state, &ctx)
                .await
                .map_err(|e| PitchlensError::stage("Market analysis", e))?;
            Ok(StageFlow::Continue)
        })
    }
}

struct GithubAnalysis {
    graph: Arc<CompiledGraph<RepoResearchState>>,
}

impl GithubAnalysis {
    async fn analyze(&self, state: &mut SupervisorState, ctx: &StageContext) -> Result<()> {
        let link = match (&state.github_url, state.is_tech_company) {
            (Some(link), true) => link.clone(),
            _ => {
                debug!("No repository to research, skipping");
                return Ok(());
            }
        };

        let result = self
            .graph
            .ainvoke(
                RunInput::Fresh(RepoResearchState::new(link)),
                Some(ctx.run_id.clone()),
            )
            .await?;

        if let Some(error) = result.error {
            state.record_error(error);
            return Ok(());
        }
        state.github_details = result.repositories;
        Ok(())
    }
}

impl Stage<SupervisorState> for GithubAnalysis {
    fn run<'a>(
        &'a self,
        state: &'a mut SupervisorState,
        ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.analyze(state, &ctx)
                .await
                .map_err(|e| PitchlensError::stage("GitHub analysis", e))?;
            Ok(StageFlow::Continue)
        })
    }
}

fn fail_on_error(state: &mut SupervisorState, _ctx: &StageContext) -> Result<StageFlow> {
    match state.error() {
        Some(error) => Err(PitchlensError::RunFailed(error.to_string())),
        None => Ok(StageFlow::Continue),
    }
}

/// Build the supervisor graph and its three sub-workflows.
///
/// Sub-workflows run without checkpoints; only the supervisor run is saved.
pub fn build(
    collab: &Collaborators,
    checkpointer: Option<Arc<dyn CheckpointStore<SupervisorState>>>,
) -> Result<CompiledGraph<SupervisorState>> {
    let graph = StateGraph::new(GRAPH)
        .register_stage(
            PITCH_DECK_ANALYSIS,
            PitchDeckAnalysis {
                graph: Arc::new(slide_analysis::build(collab, None)?),
            },
        )
        .register_stage(
            MARKET_ANALYSIS,
            MarketAnalysis {
                graph: Arc::new(market_research::build(collab, None)?),
            },
        )
        .register_stage(
            GITHUB_ANALYSIS,
            GithubAnalysis {
                graph: Arc::new(repo_research::build(collab, None)?),
            },
        )
        .register_stage(END, FnStage::new(fail_on_error))
        .set_entry(PITCH_DECK_ANALYSIS)
        .set_terminal(END)
        .add_conditional_edge(PITCH_DECK_ANALYSIS, halt_on_error, MARKET_ANALYSIS)
        .add_conditional_edge(MARKET_ANALYSIS, halt_on_error, GITHUB_ANALYSIS)
        .add_conditional_edge(GITHUB_ANALYSIS, halt_on_error, END)
        .compile(checkpointer)?;
    Ok(collab.finish(graph))
}

/// Deck summary section of a [`SupervisorReport`].
#[derive(Debug, Clone, Serialize)]
pub struct PitchDeckSummary {
    pub company_overview: Option<CompanyOverview>,
    pub founder_market_fit: Option<FounderMarketFit>,
    pub market_sizing: Option<MarketSizingGrowth>,
    pub traction: Option<Traction>,
    pub slide_content: Option<Vec<SlideContent>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketAnalysisReport {
    pub sector: Option<SectorInfo>,
    pub market_size: Option<MarketSizeInfo>,
    pub competitors: Option<Vec<CompetitorInfo>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GithubAnalysisReport {
    pub repositories: Vec<RepositoryRecord>,
}

/// Caller-facing view of a finished supervisor run.
///
/// Market analysis appears only when a sector was found, GitHub analysis only
/// when repositories were extracted.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorReport {
    pub pitch_deck_summary: Option<PitchDeckSummary>,
    pub pitch_deck_scorecard: Option<Vec<ScoreEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_analysis: Option<MarketAnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_analysis: Option<GithubAnalysisReport>,
    pub is_tech_company: bool,
}

impl From<&SupervisorState> for SupervisorReport {
    fn from(state: &SupervisorState) -> Self {
        let summary = state.summary.as_ref();
        Self {
            pitch_deck_summary: summary.map(|s| PitchDeckSummary {
                company_overview: Some(s.company_overview.clone()),
                founder_market_fit: Some(s.founder_market_fit.clone()),
                market_sizing: Some(s.market_sizing.clone()),
                traction: Some(s.traction.clone()),
                slide_content: state.slide_content.clone(),
            }),
            pitch_deck_scorecard: state.scorecard.clone(),
            market_analysis: state.sector.as_ref().map(|sector| MarketAnalysisReport {
                sector: Some(sector.clone()),
                market_size: state.market_size.clone(),
                competitors: state.competitors.clone(),
            }),
            github_analysis: state
                .github_details
                .as_ref()
                .filter(|repos| !repos.is_empty())
                .map(|repos| GithubAnalysisReport {
                    repositories: repos.clone(),
                }),
            is_tech_company: state.is_tech_company,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_omits_missing_sections() {
        let state = SupervisorState {
            summary: Some(DeckSummary::default()),
            scorecard: Some(Vec::new()),
            ..Default::default()
        };
        let report = SupervisorReport::from(&state);
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("market_analysis").is_none());
        assert!(value.get("github_analysis").is_none());
        assert_eq!(value["is_tech_company"], false);
        assert!(value["pitch_deck_summary"]["company_overview"].is_object());
    }

    #[test]
    fn report_includes_market_when_sector_found() {
        let state = SupervisorState {
            sector: Some(SectorInfo {
                name: "FinTech".into(),
                citation: vec![],
            }),
            github_details: Some(vec![RepositoryRecord {
                repository: "engine".into(),
                ..Default::default()
            }]),
            is_tech_company: true,
            ..Default::default()
        };
        let report = SupervisorReport::from(&state);
        assert_eq!(report.market_analysis.unwrap().sector.unwrap().name, "FinTech");
        assert_eq!(report.github_analysis.unwrap().repositories.len(), 1);
    }

    #[test]
    fn terminal_raises_recorded_error() {
        let mut state = SupervisorState::default();
        let ctx = StageContext {
            graph: GRAPH.into(),
            run_id: Default::default(),
            stage: END.into(),
            resume: None,
        };
        assert!(fail_on_error(&mut state, &ctx).is_ok());
        state.record_error("Market Research failed: quota");
        let err = fail_on_error(&mut state, &ctx).unwrap_err();
        assert_eq!(err.to_string(), "Market Research failed: quota");
    }
}
