use std::marker::PhantomData;

use futures::future::BoxFuture;

use pitchlens_core::error::Result;
use pitchlens_core::types::RunId;

use super::state::RunState;

/// What a stage asks the engine to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFlow {
    /// Follow the outgoing edge.
    Continue,
    /// Pause the run until a human reply arrives. The stage runs again on resume.
    Suspend { prompt: String },
}

/// Per-execution context handed to a stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub graph: String,
    pub run_id: RunId,
    pub stage: String,
    /// Human reply when this execution resumes a suspended stage.
    pub resume: Option<String>,
}

/// One step of a workflow graph.
///
/// A stage mutates the run state in place. Returning `Err` records the error
/// message in the state and routes the run to the terminal stage.
pub trait Stage<S: RunState>: Send + Sync + 'static {
    fn run<'a>(&'a self, state: &'a mut S, ctx: StageContext) -> BoxFuture<'a, Result<StageFlow>>;
}

/// Adapter turning a synchronous closure into a [`Stage`].
pub struct FnStage<S, F> {
    f: F,
    _state: PhantomData<fn(&mut S)>,
}

impl<S, F> FnStage<S, F>
where
    S: RunState,
    F: Fn(&mut S, &StageContext) -> Result<StageFlow> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _state: PhantomData,
        }
    }
}

impl<S, F> Stage<S> for FnStage<S, F>
where
    S: RunState,
    F: Fn(&mut S, &StageContext) -> Result<StageFlow> + Send + Sync + 'static,
{
    fn run<'a>(&'a self, state: &'a mut S, ctx: StageContext) -> BoxFuture<'a, Result<StageFlow>> {
        let out = (self.f)(state, &ctx);
        Box::pin(async move { out })
    }
}

/// Terminal stage for sub-workflows: hands the state back untouched.
pub struct PassThrough;

impl<S: RunState> Stage<S> for PassThrough {
    fn run<'a>(&'a self, _state: &'a mut S, _ctx: StageContext) -> BoxFuture<'a, Result<StageFlow>> {
        Box::pin(async { Ok(StageFlow::Continue) })
    }
}
