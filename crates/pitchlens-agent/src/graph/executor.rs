use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::event::EventBus;
use pitchlens_core::types::{GraphEvent, RunId};

use super::edge::{next_stage, Route, Transition};
use super::stage::{Stage, StageContext, StageFlow};
use super::state::RunState;
use crate::checkpoint::{Checkpoint, CheckpointStore, PendingTask};

/// Default bound on stage executions per run.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Input to a graph run.
#[derive(Debug, Clone)]
pub enum RunInput<S> {
    /// Start at the entry stage with this state.
    Fresh(S),
    /// Re-enter the suspended stage of an existing run with a human reply.
    Resume(String),
}

/// A validated, runnable workflow graph.
///
/// Stages of one run execute strictly one after another. Independent runs may
/// share a compiled graph.
pub struct CompiledGraph<S: RunState> {
    name: String,
    stages: HashMap<String, Arc<dyn Stage<S>>>,
    order: Vec<String>,
    transitions: HashMap<String, Transition<S>>,
    entry: String,
    terminal: String,
    checkpointer: Option<Arc<dyn CheckpointStore<S>>>,
    recursion_limit: usize,
    events: Option<Arc<EventBus>>,
}

impl<S: RunState> CompiledGraph<S> {
    pub(crate) fn new(
        name: String,
        stages: HashMap<String, Arc<dyn Stage<S>>>,
        order: Vec<String>,
        transitions: HashMap<String, Transition<S>>,
        entry: String,
        terminal: String,
        checkpointer: Option<Arc<dyn CheckpointStore<S>>>,
    ) -> Self {
        Self {
            name,
            stages,
            order,
            transitions,
            entry,
            terminal,
            checkpointer,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            events: None,
        }
    }

    /// Bound the number of stage executions per run.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    /// Publish progress events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    /// Last checkpoint of `run_id`, including any suspended task.
    pub async fn get_state(&self, run_id: &RunId) -> Result<Option<Checkpoint<S>>> {
        match &self.checkpointer {
            Some(store) => store.load(&self.name, run_id).await,
            None => Ok(None),
        }
    }

    /// Blocking variant of [`CompiledGraph::ainvoke`]. Must not be called from
    /// inside an async runtime.
    pub fn invoke(&self, input: RunInput<S>, run_id: Option<RunId>) -> Result<S> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        rt.block_on(self.ainvoke(input, run_id))
    }

    /// Run the graph to the terminal stage, or until a stage suspends.
    ///
    /// Stage failures are recorded in the state's error slot and routed to the
    /// terminal; only the terminal stage's own `Err` is returned to the caller.
    pub async fn ainvoke(&self, input: RunInput<S>, run_id: Option<RunId>) -> Result<S> {
        let run_id = run_id.unwrap_or_default();

        let (mut state, mut current, mut step, mut visited, mut resume) = match input {
            RunInput::Fresh(state) => {
                let start = match state.error() {
                    Some(_) => self.terminal.clone(),
                    None => self.entry.clone(),
                };
                (state, start, 0, Vec::new(), None)
            }
            RunInput::Resume(reply) => {
                let cp = self
                    .get_state(&run_id)
                    .await?
                    .ok_or_else(|| PitchlensError::UnknownRun(run_id.to_string()))?;
                let pending = cp
                    .pending
                    .ok_or_else(|| PitchlensError::NothingToResume(run_id.to_string()))?;
                (cp.state, pending.stage, cp.step, cp.visited, Some(reply))
            }
        };

        let resumed = resume.is_some();
        info!(graph = %self.name, run_id = %run_id, resumed, stage = %current, "Starting graph run");
        self.publish(GraphEvent::RunStarted {
            graph: self.name.clone(),
            run_id: run_id.clone(),
            resumed,
        });

        loop {
            if step >= self.recursion_limit && current != self.terminal {
                let err = PitchlensError::RecursionLimit(self.recursion_limit);
                warn!(graph = %self.name, run_id = %run_id, stage = %current, "{}", err);
                state.record_error(err.to_string());
                current = self.terminal.clone();
            }

            let stage = self.stages.get(&current).ok_or_else(|| {
                PitchlensError::GraphConfig(format!("{}: stage '{}' vanished", self.name, current))
            })?;

            debug!(graph = %self.name, run_id = %run_id, stage = %current, step, "Executing stage");
            self.publish(GraphEvent::StageStarted {
                graph: self.name.clone(),
                run_id: run_id.clone(),
                stage: current.clone(),
            });

            let ctx = StageContext {
                graph: self.name.clone(),
                run_id: run_id.clone(),
                stage: current.clone(),
                resume: resume.take(),
            };
            let started = Instant::now();
            let outcome = stage.run(&mut state, ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            step += 1;
            visited.push(current.clone());

            let is_terminal = current == self.terminal;
            match outcome {
                Ok(StageFlow::Continue) => {
                    debug!(graph = %self.name, stage = %current, elapsed_ms, "Stage complete");
                    self.publish(GraphEvent::StageCompleted {
                        graph: self.name.clone(),
                        run_id: run_id.clone(),
                        stage: current.clone(),
                        elapsed_ms,
                    });
                }
                Ok(StageFlow::Suspend { prompt }) => {
                    info!(graph = %self.name, run_id = %run_id, stage = %current, "Run suspended");
                    let pending = PendingTask {
                        stage: current.clone(),
                        prompt: prompt.clone(),
                    };
                    self.checkpoint(&run_id, &state, Some(current.clone()), Some(pending), step, &visited)
                        .await?;
                    self.publish(GraphEvent::RunSuspended {
                        graph: self.name.clone(),
                        run_id: run_id.clone(),
                        stage: current,
                        prompt,
                    });
                    return Ok(state);
                }
                Err(e) if is_terminal => {
                    warn!(graph = %self.name, run_id = %run_id, error = %e, "Run failed at terminal stage");
                    self.checkpoint(&run_id, &state, None, None, step, &visited).await?;
                    self.publish(GraphEvent::RunHalted {
                        graph: self.name.clone(),
                        run_id: run_id.clone(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
                Err(e) => {
                    warn!(graph = %self.name, run_id = %run_id, stage = %current, error = %e, "Stage failed");
                    state.record_error(e.to_string());
                }
            }

            if is_terminal {
                self.checkpoint(&run_id, &state, None, None, step, &visited).await?;
                match state.error() {
                    Some(error) => {
                        info!(graph = %self.name, run_id = %run_id, steps = step, error, "Run halted");
                        self.publish(GraphEvent::RunHalted {
                            graph: self.name.clone(),
                            run_id: run_id.clone(),
                            error: error.to_string(),
                        });
                    }
                    None => {
                        info!(graph = %self.name, run_id = %run_id, steps = step, "Run complete");
                        self.publish(GraphEvent::RunCompleted {
                            graph: self.name.clone(),
                            run_id: run_id.clone(),
                            steps: step,
                        });
                    }
                }
                return Ok(state);
            }

            let transition = self.transitions.get(&current).ok_or_else(|| {
                PitchlensError::GraphConfig(format!("{}: stage '{}' has no edge", self.name, current))
            })?;
            let (next, route) = next_stage(&state, transition, &self.terminal);
            if route == Route::Halt {
                debug!(graph = %self.name, from = %current, "Halting on error");
            }
            self.checkpoint(&run_id, &state, Some(next.clone()), None, step, &visited)
                .await?;
            current = next;
        }
    }

    async fn checkpoint(
        &self,
        run_id: &RunId,
        state: &S,
        next_stage: Option<String>,
        pending: Option<PendingTask>,
        step: usize,
        visited: &[String],
    ) -> Result<()> {
        let Some(store) = &self.checkpointer else {
            return Ok(());
        };
        store
            .save(Checkpoint {
                graph: self.name.clone(),
                run_id: run_id.clone(),
                state: state.clone(),
                next_stage,
                pending,
                step,
                visited: visited.to_vec(),
                updated_at: Utc::now(),
            })
            .await
    }

    fn publish(&self, event: GraphEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Mermaid flowchart of the graph.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        out.push_str(&format!("    __start__([start]) --> {}\n", self.entry));
        for name in &self.order {
            let Some(t) = self.transitions.get(name) else {
                continue;
            };
            match t {
                Transition::Direct { to } => {
                    out.push_str(&format!("    {} --> {}\n", name, to));
                }
                Transition::Conditional { next, .. } => {
                    out.push_str(&format!("    {} -. next .-> {}\n", name, next));
                    out.push_str(&format!("    {} -. finish/halt .-> {}\n", name, self.terminal));
                }
            }
        }
        out.push_str(&format!("    {} --> __end__([end])\n", self.terminal));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::graph::{halt_on_error, FnStage, PassThrough, StateGraph};
    use futures::future::BoxFuture;
    use pitchlens_core::types::GraphEvent;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Trace {
        visited: Vec<String>,
        loops: usize,
        reply: Option<String>,
        error: Option<String>,
    }

    impl RunState for Trace {
        fn error(&self) -> Option<&str> {
            self.error.as_deref()
        }
        fn error_slot(&mut self) -> &mut Option<String> {
            &mut self.error
        }
    }

    fn mark(name: &'static str) -> impl Stage<Trace> {
        FnStage::new(move |s: &mut Trace, _: &StageContext| {
            s.visited.push(name.to_string());
            Ok(StageFlow::Continue)
        })
    }

    fn failing(name: &'static str) -> impl Stage<Trace> {
        FnStage::new(move |s: &mut Trace, _: &StageContext| {
            s.visited.push(name.to_string());
            Err(PitchlensError::Precondition(format!("{} broke", name)))
        })
    }

    /// Suspends until it sees a reply.
    struct AskOnce;

    impl Stage<Trace> for AskOnce {
        fn run<'a>(
            &'a self,
            state: &'a mut Trace,
            ctx: StageContext,
        ) -> BoxFuture<'a, Result<StageFlow>> {
            Box::pin(async move {
                state.visited.push("ask".into());
                match ctx.resume {
                    Some(reply) => {
                        state.reply = Some(reply);
                        Ok(StageFlow::Continue)
                    }
                    None => Ok(StageFlow::Suspend {
                        prompt: "Which company?".into(),
                    }),
                }
            })
        }
    }

    fn linear(second: impl Stage<Trace>) -> StateGraph<Trace> {
        StateGraph::new("linear")
            .register_stage("a", mark("a"))
            .register_stage("b", second)
            .register_stage("c", mark("c"))
            .register_stage("end", PassThrough)
            .set_entry("a")
            .set_terminal("end")
            .add_conditional_edge("a", halt_on_error, "b")
            .add_conditional_edge("b", halt_on_error, "c")
            .add_conditional_edge("c", halt_on_error, "end")
    }

    #[tokio::test]
    async fn runs_stages_in_order() {
        let graph = linear(mark("b")).compile(None).unwrap();
        let out = graph.ainvoke(RunInput::Fresh(Trace::default()), None).await.unwrap();
        assert_eq!(out.visited, vec!["a", "b", "c"]);
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn stage_error_drains_to_terminal() {
        let graph = linear(failing("b")).compile(None).unwrap();
        let out = graph.ainvoke(RunInput::Fresh(Trace::default()), None).await.unwrap();
        assert_eq!(out.visited, vec!["a", "b"]);
        assert_eq!(out.error.as_deref(), Some("b broke"));
    }

    #[tokio::test]
    async fn direct_edge_cannot_bypass_error() {
        let graph = StateGraph::new("direct")
            .register_stage("a", failing("a"))
            .register_stage("b", mark("b"))
            .register_stage("end", PassThrough)
            .set_entry("a")
            .set_terminal("end")
            .add_edge("a", "b")
            .add_edge("b", "end")
            .compile(None)
            .unwrap();
        let out = graph.ainvoke(RunInput::Fresh(Trace::default()), None).await.unwrap();
        assert_eq!(out.visited, vec!["a"]);
        assert!(out.error.is_some());
    }

    #[tokio::test]
    async fn first_error_is_kept() {
        let graph = linear(failing("b")).compile(None).unwrap();
        let mut input = Trace::default();
        input.record_error("earlier failure");
        let out = graph.ainvoke(RunInput::Fresh(input), None).await.unwrap();
        assert_eq!(out.error.as_deref(), Some("earlier failure"));
        assert!(out.visited.is_empty());
    }

    #[tokio::test]
    async fn errored_input_goes_straight_to_terminal() {
        let store = Arc::new(MemoryCheckpointStore::<Trace>::new());
        let graph = linear(mark("b")).compile(Some(store)).unwrap();
        let run = RunId::from_str("run-err");
        let mut input = Trace::default();
        input.record_error("bad input");

        let out = graph
            .ainvoke(RunInput::Fresh(input), Some(run.clone()))
            .await
            .unwrap();
        assert!(out.visited.is_empty());
        let cp = graph.get_state(&run).await.unwrap().unwrap();
        assert_eq!(cp.visited, vec!["end"]);
        assert_eq!(cp.step, 1);
    }

    #[tokio::test]
    async fn terminal_error_is_returned() {
        let graph = StateGraph::new("strict")
            .register_stage("a", failing("a"))
            .register_stage(
                "end",
                FnStage::new(|s: &mut Trace, _: &StageContext| match s.error() {
                    Some(e) => Err(PitchlensError::RunFailed(e.to_string())),
                    None => Ok(StageFlow::Continue),
                }),
            )
            .set_entry("a")
            .set_terminal("end")
            .add_conditional_edge("a", halt_on_error, "end")
            .compile(None)
            .unwrap();
        let err = graph
            .ainvoke(RunInput::Fresh(Trace::default()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PitchlensError::RunFailed(ref m) if m == "a broke"));
    }

    #[tokio::test]
    async fn recursion_limit_halts_cycles() {
        let graph = StateGraph::new("spin")
            .register_stage(
                "loop",
                FnStage::new(|s: &mut Trace, _: &StageContext| {
                    s.loops += 1;
                    Ok(StageFlow::Continue)
                }),
            )
            .register_stage("end", PassThrough)
            .set_entry("loop")
            .set_terminal("end")
            .add_conditional_edge("loop", halt_on_error, "loop")
            .compile(None)
            .unwrap()
            .with_recursion_limit(5);
        let out = graph.ainvoke(RunInput::Fresh(Trace::default()), None).await.unwrap();
        assert_eq!(out.loops, 5);
        assert!(out.error.unwrap().contains("Recursion limit"));
    }

    #[tokio::test]
    async fn checkpoint_after_every_stage() {
        let store = Arc::new(MemoryCheckpointStore::<Trace>::new());
        let graph = linear(mark("b")).compile(Some(store.clone())).unwrap();
        let run = RunId::from_str("run-1");
        graph
            .ainvoke(RunInput::Fresh(Trace::default()), Some(run.clone()))
            .await
            .unwrap();

        let cp = graph.get_state(&run).await.unwrap().unwrap();
        assert_eq!(cp.step, 4);
        assert_eq!(cp.visited, vec!["a", "b", "c", "end"]);
        assert!(cp.is_finished());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn suspend_and_resume() {
        let store = Arc::new(MemoryCheckpointStore::<Trace>::new());
        let graph = StateGraph::new("chat")
            .register_stage("ask", AskOnce)
            .register_stage("after", mark("after"))
            .register_stage("end", PassThrough)
            .set_entry("ask")
            .set_terminal("end")
            .add_conditional_edge("ask", halt_on_error, "after")
            .add_edge("after", "end")
            .compile(Some(store))
            .unwrap();
        let run = RunId::from_str("thread-7");

        let paused = graph
            .ainvoke(RunInput::Fresh(Trace::default()), Some(run.clone()))
            .await
            .unwrap();
        assert_eq!(paused.visited, vec!["ask"]);
        let cp = graph.get_state(&run).await.unwrap().unwrap();
        let pending = cp.pending.unwrap();
        assert_eq!(pending.stage, "ask");
        assert_eq!(pending.prompt, "Which company?");

        let done = graph
            .ainvoke(RunInput::Resume("Acme".into()), Some(run.clone()))
            .await
            .unwrap();
        assert_eq!(done.reply.as_deref(), Some("Acme"));
        assert_eq!(done.visited, vec!["ask", "ask", "after"]);
        assert!(graph.get_state(&run).await.unwrap().unwrap().pending.is_none());
    }

    #[tokio::test]
    async fn resume_without_pending_task_is_rejected() {
        let store = Arc::new(MemoryCheckpointStore::<Trace>::new());
        let graph = linear(mark("b")).compile(Some(store)).unwrap();
        let run = RunId::from_str("done");
        graph
            .ainvoke(RunInput::Fresh(Trace::default()), Some(run.clone()))
            .await
            .unwrap();

        let err = graph
            .ainvoke(RunInput::Resume("again".into()), Some(run))
            .await
            .unwrap_err();
        assert!(matches!(err, PitchlensError::NothingToResume(_)));
    }

    #[tokio::test]
    async fn resume_unknown_run_is_rejected() {
        let store = Arc::new(MemoryCheckpointStore::<Trace>::new());
        let graph = linear(mark("b")).compile(Some(store)).unwrap();
        let err = graph
            .ainvoke(RunInput::Resume("hi".into()), Some(RunId::from_str("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, PitchlensError::UnknownRun(_)));

        // Without a store there is nothing to resume from either
        let graph = linear(mark("b")).compile(None).unwrap();
        let err = graph
            .ainvoke(RunInput::Resume("hi".into()), Some(RunId::from_str("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, PitchlensError::UnknownRun(_)));
    }

    #[tokio::test]
    async fn fresh_input_restarts_existing_run() {
        let store = Arc::new(MemoryCheckpointStore::<Trace>::new());
        let graph = linear(mark("b")).compile(Some(store)).unwrap();
        let run = RunId::from_str("again");
        for _ in 0..2 {
            let out = graph
                .ainvoke(RunInput::Fresh(Trace::default()), Some(run.clone()))
                .await
                .unwrap();
            assert_eq!(out.visited, vec!["a", "b", "c"]);
        }
        assert_eq!(graph.get_state(&run).await.unwrap().unwrap().step, 4);
    }

    #[tokio::test]
    async fn publishes_progress_events() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let graph = linear(failing("b")).compile(None).unwrap().with_events(bus);
        graph.ainvoke(RunInput::Fresh(Trace::default()), None).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                GraphEvent::RunStarted { .. } => "run_started",
                GraphEvent::StageStarted { .. } => "stage_started",
                GraphEvent::StageCompleted { .. } => "stage_completed",
                GraphEvent::RunHalted { .. } => "run_halted",
                GraphEvent::RunSuspended { .. } => "run_suspended",
                GraphEvent::RunCompleted { .. } => "run_completed",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "run_started",
                "stage_started",
                "stage_completed",
                "stage_started",
                "stage_started",
                "stage_completed",
                "run_halted",
            ]
        );
    }

    #[test]
    fn blocking_invoke() {
        let graph = linear(mark("b")).compile(None).unwrap();
        let out = graph.invoke(RunInput::Fresh(Trace::default()), None).unwrap();
        assert_eq!(out.visited.len(), 3);
    }

    #[test]
    fn mermaid_lists_edges() {
        let graph = linear(mark("b")).compile(None).unwrap();
        let chart = graph.to_mermaid();
        assert!(chart.starts_with("graph TD"));
        assert!(chart.contains("a -. next .-> b"));
        assert!(chart.contains("end --> __end__"));
    }
}
