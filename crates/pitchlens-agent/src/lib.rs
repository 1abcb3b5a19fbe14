//! Orchestration core: the graph engine, the fan-out helper and the
//! pitch-deck analysis workflows built on them.

pub mod checkpoint;
pub mod classify;
pub mod fanout;
pub mod graph;
pub mod models;
pub mod prompts;
pub mod workflows;

pub use checkpoint::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, PendingTask, SqliteCheckpointStore,
};
pub use fanout::FanOut;
pub use graph::{
    halt_on_error, CompiledGraph, FnStage, PassThrough, Route, RunInput, RunState, Stage,
    StageContext, StageFlow, StateGraph,
};
pub use workflows::market_research::MarketResearchState;
pub use workflows::qa::QaState;
pub use workflows::repo_research::RepoResearchState;
pub use workflows::slide_analysis::SlideAnalysisState;
pub use workflows::supervisor::{SupervisorReport, SupervisorState};
pub use workflows::Collaborators;
