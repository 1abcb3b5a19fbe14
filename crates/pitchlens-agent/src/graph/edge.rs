use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::state::RunState;

/// Outcome of a conditional edge's decision function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Go to the edge's target stage.
    Next,
    /// Work is done; go to the terminal.
    Finish,
    /// An error is present; go to the terminal.
    Halt,
}

/// Decision function attached to a conditional edge.
pub type Decision<S> = Arc<dyn Fn(&S) -> Route + Send + Sync>;

/// The single outgoing transition of a non-terminal stage.
pub enum Transition<S> {
    /// Always go to `to`.
    Direct { to: String },
    /// `decide` picks between `next` and the terminal.
    Conditional { decide: Decision<S>, next: String },
}

impl<S> Clone for Transition<S> {
    fn clone(&self) -> Self {
        match self {
            Transition::Direct { to } => Transition::Direct { to: to.clone() },
            Transition::Conditional { decide, next } => Transition::Conditional {
                decide: decide.clone(),
                next: next.clone(),
            },
        }
    }
}

impl<S> Transition<S> {
    /// Stage the transition leads to when it does not go to the terminal.
    pub fn target(&self) -> &str {
        match self {
            Transition::Direct { to } => to,
            Transition::Conditional { next, .. } => next,
        }
    }
}

/// Shared routing policy: halt when an error is present, otherwise continue.
///
/// Every conditional edge either uses this directly or consults it first.
pub fn halt_on_error<S: RunState>(state: &S) -> Route {
    if state.has_error() {
        Route::Halt
    } else {
        Route::Next
    }
}

/// Resolve the stage that follows `transition`.
///
/// A present error always leads to the terminal, whatever the edge says.
pub(crate) fn next_stage<S: RunState>(
    state: &S,
    transition: &Transition<S>,
    terminal: &str,
) -> (String, Route) {
    if state.has_error() {
        return (terminal.to_string(), Route::Halt);
    }
    match transition {
        Transition::Direct { to } => (to.clone(), Route::Next),
        Transition::Conditional { decide, next } => match decide(state) {
            Route::Next => (next.clone(), Route::Next),
            route => (terminal.to_string(), route),
        },
    }
}
