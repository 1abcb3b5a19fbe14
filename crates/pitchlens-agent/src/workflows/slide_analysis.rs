//! Slide analysis: extract every slide, summarize the deck, score it.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::{ContentIndex, StructuredExtractor};
use pitchlens_core::types::{ChatMessage, ExtractionRequest, IndexedDocument};

use super::{extract_record, Collaborators};
use crate::checkpoint::CheckpointStore;
use crate::fanout::FanOut;
use crate::graph::{
    halt_on_error, CompiledGraph, PassThrough, RunState, Stage, StageContext, StageFlow,
    StateGraph,
};
use crate::models::{
    DeckSummary, ScoreEntry, ScoringResponse, SlideContent, SlideExtraction, SlideRecord,
    COMPANY_OVERVIEW, FOUNDER_MARKET_FIT, MARKET_SIZING, TRACTION,
};
use crate::prompts;

pub const GRAPH: &str = "slide_analysis";
pub const EXTRACT_SLIDES: &str = "extract_slides";
pub const SUMMARIZE_SLIDES: &str = "summarize_slides";
pub const SCORE_DECK: &str = "score_deck";
pub const END: &str = "end";

/// Summary aspects, one fan-out task each.
pub const ASPECTS: [&str; 4] = [COMPANY_OVERVIEW, FOUNDER_MARKET_FIT, MARKET_SIZING, TRACTION];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlideAnalysisState {
    pub slides: Vec<SlideRecord>,
    #[serde(default)]
    pub slide_content: Option<Vec<SlideContent>>,
    #[serde(default)]
    pub summary: Option<DeckSummary>,
    #[serde(default)]
    pub scorecard: Option<Vec<ScoreEntry>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SlideAnalysisState {
    pub fn new(slides: Vec<SlideRecord>) -> Self {
        Self {
            slides,
            ..Default::default()
        }
    }
}

impl RunState for SlideAnalysisState {
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn error_slot(&mut self) -> &mut Option<String> {
        &mut self.error
    }
}

struct ExtractSlides {
    vision: Arc<dyn StructuredExtractor>,
    fan_out: FanOut,
}

impl ExtractSlides {
    async fn extract(&self, state: &mut SlideAnalysisState) -> Result<()> {
        if state.slides.is_empty() {
            return Err(PitchlensError::Precondition("No slides to analyze".into()));
        }

        let images: Vec<String> = state.slides.iter().map(|s| s.image.clone()).collect();
        let vision = self.vision.clone();
        let extracted = self
            .fan_out
            .run(images, move |index, image| {
                let vision = vision.clone();
                async move {
                    debug!(index, "Extracting slide");
                    let request = ExtractionRequest::new(prompts::SLIDE_EXTRACTION)
                        .with_message(ChatMessage::user_image(image))
                        .with_schema(prompts::slide_extraction_schema());
                    extract_record::<SlideExtraction>(vision.as_ref(), request).await
                }
            })
            .await?;

        let mut content = Vec::with_capacity(extracted.len());
        for (index, (slide, found)) in state.slides.iter_mut().zip(extracted).enumerate() {
            slide.text = Some(found.text.clone());
            slide.images = Some(found.images.clone());
            slide.figures = Some(found.figures.clone());
            content.push(SlideContent {
                index,
                text: found.text,
                images: found.images,
                figures: found.figures,
            });
        }

        info!(slides = content.len(), "Slides extracted");
        state.slide_content = Some(content);
        Ok(())
    }
}

impl Stage<SlideAnalysisState> for ExtractSlides {
    fn run<'a>(
        &'a self,
        state: &'a mut SlideAnalysisState,
        _ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.extract(state)
                .await
                .map_err(|e| PitchlensError::stage("Slide extraction", e))?;
            Ok(StageFlow::Continue)
        })
    }
}

struct SummarizeSlides {
    extractor: Arc<dyn StructuredExtractor>,
    index: Option<Arc<dyn ContentIndex>>,
    fan_out: FanOut,
}

impl SummarizeSlides {
    async fn summarize(&self, state: &SlideAnalysisState) -> Result<DeckSummary> {
        let content = state
            .slide_content
            .as_ref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PitchlensError::Precondition("No slide content to summarize".into()))?;
        let slides_json = Arc::new(serde_json::to_string(content)?);

        let extractor = self.extractor.clone();
        let records = self
            .fan_out
            .run(ASPECTS.to_vec(), move |_, aspect| {
                let extractor = extractor.clone();
                let slides_json = slides_json.clone();
                async move {
                    debug!(aspect, "Summarizing aspect");
                    let request = ExtractionRequest::new(prompts::aspect_instructions(aspect))
                        .with_message(ChatMessage::user(slides_json.as_str()))
                        .with_schema(prompts::aspect_schema(aspect));
                    extract_record::<Value>(extractor.as_ref(), request).await
                }
            })
            .await?;

        let composed: serde_json::Map<String, Value> = ASPECTS
            .iter()
            .map(|a| a.to_string())
            .zip(records)
            .collect();
        serde_json::from_value(Value::Object(composed))
            .map_err(|e| PitchlensError::Extraction(format!("malformed summary record: {}", e)))
    }

    async fn persist(&self, summary: &DeckSummary, ctx: &StageContext) {
        let Some(index) = &self.index else {
            return;
        };
        let document = IndexedDocument {
            id: ctx.run_id.to_string(),
            title: summary.company_name().unwrap_or("Untitled deck").to_string(),
            body: summary.to_text(),
            source: Some(format!("{}/{}", ctx.graph, ctx.run_id)),
        };
        match index.index(document).await {
            Ok(()) => debug!(run_id = %ctx.run_id, "Summary indexed"),
            Err(e) => warn!(run_id = %ctx.run_id, error = %e, "Failed to index deck summary"),
        }
    }
}

impl Stage<SlideAnalysisState> for SummarizeSlides {
    fn run<'a>(
        &'a self,
        state: &'a mut SlideAnalysisState,
        ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            let summary = self
                .summarize(state)
                .await
                .map_err(|e| PitchlensError::stage("Summarization", e))?;
            self.persist(&summary, &ctx).await;
            info!(company = summary.company_name().unwrap_or("unknown"), "Deck summarized");
            state.summary = Some(summary);
            Ok(StageFlow::Continue)
        })
    }
}

struct ScoreDeck {
    extractor: Arc<dyn StructuredExtractor>,
}

impl ScoreDeck {
    async fn score(&self, state: &SlideAnalysisState) -> Result<Vec<ScoreEntry>> {
        let summary = state
            .summary
            .as_ref()
            .ok_or_else(|| PitchlensError::Precondition("No deck summary to score".into()))?;
        let request = ExtractionRequest::new(prompts::SCORING_PROMPT)
            .with_message(ChatMessage::user(serde_json::to_string_pretty(summary)?))
            .with_schema(prompts::scorecard_schema());
        let response: ScoringResponse = extract_record(self.extractor.as_ref(), request).await?;
        Ok(response.normalize())
    }
}

impl Stage<SlideAnalysisState> for ScoreDeck {
    fn run<'a>(
        &'a self,
        state: &'a mut SlideAnalysisState,
        _ctx: StageContext,
    ) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            let scorecard = self
                .score(state)
                .await
                .map_err(|e| PitchlensError::stage("Scoring", e))?;
            info!(
                scored = scorecard.iter().filter(|s| s.score.is_some()).count(),
                "Deck scored"
            );
            state.scorecard = Some(scorecard);
            Ok(StageFlow::Continue)
        })
    }
}

/// Build the slide analysis graph.
pub fn build(
    collab: &Collaborators,
    checkpointer: Option<Arc<dyn CheckpointStore<SlideAnalysisState>>>,
) -> Result<CompiledGraph<SlideAnalysisState>> {
    let graph = StateGraph::new(GRAPH)
        .register_stage(
            EXTRACT_SLIDES,
            ExtractSlides {
                vision: collab.vision.clone(),
                fan_out: collab.fan_out.clone(),
            },
        )
        .register_stage(
            SUMMARIZE_SLIDES,
            SummarizeSlides {
                extractor: collab.extractor.clone(),
                index: collab.index.clone(),
                fan_out: collab.fan_out.clone(),
            },
        )
        .register_stage(
            SCORE_DECK,
            ScoreDeck {
                extractor: collab.extractor.clone(),
            },
        )
        .register_stage(END, PassThrough)
        .set_entry(EXTRACT_SLIDES)
        .set_terminal(END)
        .add_conditional_edge(EXTRACT_SLIDES, halt_on_error, SUMMARIZE_SLIDES)
        .add_conditional_edge(SUMMARIZE_SLIDES, halt_on_error, SCORE_DECK)
        .add_conditional_edge(SCORE_DECK, halt_on_error, END)
        .compile(checkpointer)?;
    Ok(collab.finish(graph))
}
