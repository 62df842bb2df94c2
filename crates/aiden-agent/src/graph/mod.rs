//! Checkpointed state machines built from named async nodes.
//!
//! A graph is a set of [`Node`]s, each with exactly one outgoing
//! [`Transition`]: either a fixed successor or a router over the state.
//! Nodes return partial [`StateUpdate`]s that the [`StateSchema`] merges
//! field by field. Nodes flagged with `interrupt_before` suspend the machine
//! until a human decision is fed back through [`CompiledGraph::resume`].

pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use edge::{Transition, END};
pub use executor::{CompiledGraph, GraphBuilder, RunOutcome};
pub use node::{Node, NodeContext};
pub use state::{GraphState, Reducer, StateSchema, StateUpdate};
