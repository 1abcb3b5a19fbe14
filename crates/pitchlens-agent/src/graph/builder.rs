use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use pitchlens_core::error::{PitchlensError, Result};

use super::edge::{Route, Transition};
use super::executor::CompiledGraph;
use super::stage::Stage;
use super::state::RunState;
use crate::checkpoint::CheckpointStore;

/// Builder for a workflow graph.
///
/// Every non-terminal stage gets exactly one outgoing edge definition, either
/// unconditional or conditional. Wiring mistakes are reported by
/// [`StateGraph::compile`], never at run time.
pub struct StateGraph<S: RunState> {
    name: String,
    stages: Vec<(String, Arc<dyn Stage<S>>)>,
    transitions: Vec<(String, Transition<S>)>,
    entry: Option<String>,
    terminal: Option<String>,
}

impl<S: RunState> StateGraph<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            transitions: Vec::new(),
            entry: None,
            terminal: None,
        }
    }

    pub fn register_stage(mut self, name: impl Into<String>, stage: impl Stage<S>) -> Self {
        self.stages.push((name.into(), Arc::new(stage)));
        self
    }

    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    pub fn set_terminal(mut self, name: impl Into<String>) -> Self {
        self.terminal = Some(name.into());
        self
    }

    /// Unconditional transition.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions
            .push((from.into(), Transition::Direct { to: to.into() }));
        self
    }

    /// Conditional transition: `Route::Next` goes to `next`, anything else to
    /// the terminal.
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        decide: impl Fn(&S) -> Route + Send + Sync + 'static,
        next: impl Into<String>,
    ) -> Self {
        self.transitions.push((
            from.into(),
            Transition::Conditional {
                decide: Arc::new(decide),
                next: next.into(),
            },
        ));
        self
    }

    /// Validate the wiring and produce a runnable graph.
    pub fn compile(
        self,
        checkpointer: Option<Arc<dyn CheckpointStore<S>>>,
    ) -> Result<CompiledGraph<S>> {
        let config_err = |msg: String| PitchlensError::GraphConfig(format!("{}: {}", self.name, msg));

        let entry = self
            .entry
            .clone()
            .ok_or_else(|| config_err("no entry stage set".into()))?;
        let terminal = self
            .terminal
            .clone()
            .ok_or_else(|| config_err("no terminal stage set".into()))?;

        let mut stages = HashMap::new();
        for (name, stage) in &self.stages {
            if stages.insert(name.clone(), stage.clone()).is_some() {
                return Err(config_err(format!("stage '{}' registered twice", name)));
            }
        }

        for name in [&entry, &terminal] {
            if !stages.contains_key(name) {
                return Err(config_err(format!("stage '{}' is not registered", name)));
            }
        }

        let mut transitions: HashMap<String, Transition<S>> = HashMap::new();
        for (from, transition) in &self.transitions {
            if !stages.contains_key(from) {
                return Err(config_err(format!("edge from unknown stage '{}'", from)));
            }
            if !stages.contains_key(transition.target()) {
                return Err(config_err(format!(
                    "edge from '{}' to unknown stage '{}'",
                    from,
                    transition.target()
                )));
            }
            if *from == terminal {
                return Err(config_err(format!(
                    "terminal stage '{}' must not have outgoing edges",
                    from
                )));
            }
            if transitions.insert(from.clone(), transition.clone()).is_some() {
                return Err(config_err(format!(
                    "stage '{}' has more than one outgoing edge definition",
                    from
                )));
            }
        }

        for (name, _) in &self.stages {
            if *name != terminal && !transitions.contains_key(name) {
                return Err(config_err(format!("stage '{}' has no outgoing edge", name)));
            }
        }

        // Terminal must be reachable; conditional edges also reach it directly.
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([entry.clone()]);
        while let Some(stage) = queue.pop_front() {
            if !seen.insert(stage.clone()) {
                continue;
            }
            if let Some(t) = transitions.get(&stage) {
                queue.push_back(t.target().to_string());
                if matches!(t, Transition::Conditional { .. }) {
                    queue.push_back(terminal.clone());
                }
            }
        }
        if !seen.contains(&terminal) {
            return Err(config_err(format!(
                "terminal stage '{}' is unreachable from '{}'",
                terminal, entry
            )));
        }

        let order = self.stages.iter().map(|(n, _)| n.clone()).collect();
        Ok(CompiledGraph::new(
            self.name,
            stages,
            order,
            transitions,
            entry,
            terminal,
            checkpointer,
        ))
    }
}
