//! Graph execution engine: stateful workflow graphs with conditional routing.
//!
//! A workflow is a set of named [`Stage`]s over one [`RunState`] type, wired
//! with unconditional or conditional edges into a [`StateGraph`]. Compiling
//! validates the wiring and yields a [`CompiledGraph`], which walks the graph
//! from the entry stage to the terminal stage, checkpointing after every
//! stage. Any recorded error drains the run to the terminal.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod stage;
pub mod state;

pub use builder::StateGraph;
pub use edge::{halt_on_error, Decision, Route, Transition};
pub use executor::{CompiledGraph, RunInput, DEFAULT_RECURSION_LIMIT};
pub use stage::{FnStage, PassThrough, Stage, StageContext, StageFlow};
pub use state::RunState;
