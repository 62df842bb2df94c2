pub mod agent;
pub mod checkpoint;
pub mod graph;
pub mod registry;
pub mod ryan;

pub use agent::Agent;
pub use checkpoint::{Checkpoint, CheckpointStore, RunStatus};
pub use graph::{CompiledGraph, GraphBuilder, GraphState, Node, NodeContext, RunOutcome, StateSchema, StateUpdate, END};
pub use registry::AgentRegistry;
pub use ryan::{build_ryan, RyanDeps};
