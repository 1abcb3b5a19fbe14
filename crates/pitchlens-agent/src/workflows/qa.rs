//! Deck Q&A: answer questions about analysed decks from the content index,
//! pausing to ask the user when a question is ambiguous.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::{ContentIndex, StructuredExtractor};
use pitchlens_core::types::{ChatMessage, ExtractionRequest, IndexHit, RunId};

use super::{extract_record, Collaborators};
use crate::checkpoint::CheckpointStore;
use crate::graph::{
    halt_on_error, CompiledGraph, PassThrough, Route, RunInput, RunState, Stage, StageContext,
    StageFlow, StateGraph,
};
use crate::prompts;

pub const GRAPH: &str = "qa";
pub const RESPOND: &str = "respond";
pub const RETRIEVE: &str = "retrieve";
pub const GENERATE: &str = "generate";
pub const END: &str = "end";

const RETRIEVAL_LIMIT: usize = 4;
const DEFAULT_CLARIFICATION: &str = "Could you say which company or detail you mean?";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaState {
    pub thread: Vec<ChatMessage>,
    pub question: String,
    /// Search query chosen by the respond stage; set only when retrieval is needed.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub context: Vec<IndexHit>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub pending_clarification: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QaState {
    pub fn new(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            thread: vec![ChatMessage::user(question.as_str())],
            question,
            ..Default::default()
        }
    }

    /// Next turn of a finished conversation. The thread is kept; results of
    /// the previous turn are cleared.
    pub fn follow_up(mut self, question: impl Into<String>) -> Self {
        let question = question.into();
        self.thread.push(ChatMessage::user(question.as_str()));
        self.question = question;
        self.query = None;
        self.context.clear();
        self.answer = None;
        self.pending_clarification = None;
        self.error = None;
        self
    }
}

impl RunState for QaState {
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn error_slot(&mut self) -> &mut Option<String> {
        &mut self.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Answer,
    Retrieve,
    Clarify,
}

#[derive(Debug, Deserialize)]
struct RouteDecision {
    action: Action,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    clarification: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedAnswer {
    answer: String,
}

/// After respond: retrieve when a query was chosen, otherwise done.
pub fn route_after_respond(state: &QaState) -> Route {
    match halt_on_error(state) {
        Route::Next if state.query.is_some() => Route::Next,
        Route::Next => Route::Finish,
        halted => halted,
    }
}

struct Respond {
    extractor: Arc<dyn StructuredExtractor>,
}

impl Respond {
    async fn respond(&self, state: &mut QaState, resume: Option<String>) -> Result<StageFlow> {
        if let Some(reply) = resume {
            if let Some(asked) = state.pending_clarification.take() {
                state.thread.push(ChatMessage::assistant(asked));
            }
            state.thread.push(ChatMessage::user(reply.as_str()));
            state.question = format!("{}\n{}", state.question, reply);
        }

        let request = ExtractionRequest::new(prompts::QA_ROUTE_PROMPT)
            .with_messages(state.thread.clone())
            .with_schema(prompts::qa_route_schema());
        let decision: RouteDecision = extract_record(self.extractor.as_ref(), request).await?;
        debug!(action = ?decision.action, "Question routed");

        match decision.action {
            Action::Answer => {
                let answer = decision.answer.unwrap_or_default();
                state.thread.push(ChatMessage::assistant(answer.as_str()));
                state.answer = Some(answer);
                Ok(StageFlow::Continue)
            }
            Action::Retrieve => {
                state.query = Some(
                    decision
                        .query
                        .filter(|q| !q.trim().is_empty())
                        .unwrap_or_else(|| state.question.clone()),
                );
                Ok(StageFlow::Continue)
            }
            Action::Clarify => {
                let prompt = decision
                    .clarification
                    .unwrap_or_else(|| DEFAULT_CLARIFICATION.to_string());
                state.pending_clarification = Some(prompt.clone());
                Ok(StageFlow::Suspend { prompt })
            }
        }
    }
}

impl Stage<QaState> for Respond {
    fn run<'a>(&'a self, state: &'a mut QaState, ctx: StageContext) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.respond(state, ctx.resume)
                .await
                .map_err(|e| PitchlensError::stage("Question routing", e))
        })
    }
}

struct Retrieve {
    index: Option<Arc<dyn ContentIndex>>,
}

impl Retrieve {
    async fn retrieve(&self, state: &mut QaState) -> Result<()> {
        let index = self.index.as_ref().ok_or_else(|| {
            PitchlensError::Precondition("No content index configured for retrieval".into())
        })?;
        let query = state
            .query
            .as_deref()
            .ok_or_else(|| PitchlensError::Precondition("No retrieval query".into()))?;
        state.context = index.search(query, RETRIEVAL_LIMIT).await?;
        info!(query, hits = state.context.len(), "Deck summaries retrieved");
        Ok(())
    }
}

impl Stage<QaState> for Retrieve {
    fn run<'a>(&'a self, state: &'a mut QaState, _ctx: StageContext) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.retrieve(state)
                .await
                .map_err(|e| PitchlensError::stage("Retrieval", e))?;
            Ok(StageFlow::Continue)
        })
    }
}

struct Generate {
    extractor: Arc<dyn StructuredExtractor>,
}

impl Generate {
    async fn generate(&self, state: &mut QaState) -> Result<()> {
        let excerpts = if state.context.is_empty() {
            "(no matching decks)".to_string()
        } else {
            state
                .context
                .iter()
                .map(|hit| format!("## {}\n{}", hit.title, hit.body))
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        let request = ExtractionRequest::new(prompts::QA_ANSWER_PROMPT)
            .with_message(ChatMessage::user(format!(
                "Question: {}\n\nDeck excerpts:\n{}",
                state.question, excerpts
            )))
            .with_schema(prompts::qa_answer_schema());
        let generated: GeneratedAnswer = extract_record(self.extractor.as_ref(), request).await?;

        state.thread.push(ChatMessage::assistant(generated.answer.as_str()));
        state.answer = Some(generated.answer);
        Ok(())
    }
}

impl Stage<QaState> for Generate {
    fn run<'a>(&'a self, state: &'a mut QaState, _ctx: StageContext) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async move {
            self.generate(state)
                .await
                .map_err(|e| PitchlensError::stage("Answer generation", e))?;
            Ok(StageFlow::Continue)
        })
    }
}

/// Send `text` to the conversation saved under `thread`.
///
/// A thread waiting on a clarification takes `text` as the reply. A finished
/// thread continues with `text` as its next question. Anything else starts a
/// new conversation.
pub async fn ask(
    graph: &CompiledGraph<QaState>,
    thread: &RunId,
    text: impl Into<String>,
) -> Result<QaState> {
    let text = text.into();
    let input = match graph.get_state(thread).await? {
        Some(cp) if cp.pending.is_some() => RunInput::Resume(text),
        Some(cp) if cp.is_finished() => {
            debug!(thread = %thread, turns = cp.state.thread.len(), "Continuing thread");
            RunInput::Fresh(cp.state.follow_up(text))
        }
        _ => RunInput::Fresh(QaState::new(text)),
    };
    graph.ainvoke(input, Some(thread.clone())).await
}

/// Build the Q&A graph. Clarifying questions need a checkpointer to resume.
pub fn build(
    collab: &Collaborators,
    checkpointer: Option<Arc<dyn CheckpointStore<QaState>>>,
) -> Result<CompiledGraph<QaState>> {
    let graph = StateGraph::new(GRAPH)
        .register_stage(
            RESPOND,
            Respond {
                extractor: collab.extractor.clone(),
            },
        )
        .register_stage(
            RETRIEVE,
            Retrieve {
                index: collab.index.clone(),
            },
        )
        .register_stage(
            GENERATE,
            Generate {
                extractor: collab.extractor.clone(),
            },
        )
        .register_stage(END, PassThrough)
        .set_entry(RESPOND)
        .set_terminal(END)
        .add_conditional_edge(RESPOND, route_after_respond, RETRIEVE)
        .add_edge(RETRIEVE, GENERATE)
        .add_conditional_edge(GENERATE, halt_on_error, END)
        .compile(checkpointer)?;
    Ok(collab.finish(graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respond_routing() {
        let mut state = QaState::new("What is Acme's TAM?");
        assert_eq!(route_after_respond(&state), Route::Finish);
        state.query = Some("Acme TAM".into());
        assert_eq!(route_after_respond(&state), Route::Next);
        state.record_error("Retrieval failed: index offline");
        assert_eq!(route_after_respond(&state), Route::Halt);
    }

    #[test]
    fn follow_up_keeps_thread_and_clears_turn() {
        let mut state = QaState::new("Who founded Acme?");
        state.thread.push(ChatMessage::assistant("Jane Doe."));
        state.query = Some("Acme founders".into());
        state.context.push(IndexHit {
            id: "deck-1".into(),
            title: "Acme".into(),
            body: "Founded by Jane Doe".into(),
            rank: -1.0,
            indexed_at: chrono::Utc::now(),
        });
        state.answer = Some("Jane Doe.".into());

        let next = state.follow_up("And the raise?");
        assert_eq!(next.question, "And the raise?");
        assert_eq!(next.thread.len(), 3);
        assert_eq!(next.thread[2].text(), "And the raise?");
        assert!(next.query.is_none());
        assert!(next.context.is_empty());
        assert!(next.answer.is_none());
    }

    #[test]
    fn new_state_starts_thread() {
        let state = QaState::new("Who founded Acme?");
        assert_eq!(state.thread.len(), 1);
        assert_eq!(state.thread[0].text(), "Who founded Acme?");
    }
}
