//! Test doubles for the model, retrieval and event seams, plus fixtures.

mod fixtures;
mod model;
mod retriever;
mod sink;

pub use fixtures::*;
pub use model::{ScriptedModel, ScriptedProvider};
pub use retriever::StaticRetriever;
pub use sink::RecordingSink;
