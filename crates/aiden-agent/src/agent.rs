use futures::future::BoxFuture;
use serde_json::{Map, Value};

use aiden_core::error::Result;
use aiden_core::types::ResumePayload;

use crate::checkpoint::Checkpoint;
use crate::graph::{CompiledGraph, RunOutcome};

/// A phase agent: a resumable computation addressed by thread id.
pub trait Agent: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn execute<'a>(
        &'a self,
        input: Map<String, Value>,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<RunOutcome>>;

    fn resume<'a>(
        &'a self,
        thread_id: &'a str,
        payload: ResumePayload,
    ) -> BoxFuture<'a, Result<RunOutcome>>;

    fn recover<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<RunOutcome>>;

    fn get_state(&self, thread_id: &str) -> Result<Option<Checkpoint>>;
}

impl Agent for CompiledGraph {
    fn name(&self) -> &str {
        CompiledGraph::name(self)
    }

    fn execute<'a>(
        &'a self,
        input: Map<String, Value>,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(CompiledGraph::execute(self, input, thread_id))
    }

    fn resume<'a>(
        &'a self,
        thread_id: &'a str,
        payload: ResumePayload,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(CompiledGraph::resume(self, thread_id, payload))
    }

    fn recover<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(CompiledGraph::recover(self, thread_id))
    }

    fn get_state(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        CompiledGraph::get_state(self, thread_id)
    }
}
