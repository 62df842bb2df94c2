use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use aiden_core::error::Result;
use aiden_core::types::{InterruptRequest, ResumePayload};

use super::state::{GraphState, StateUpdate};

/// What a node sees besides the state.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub thread_id: String,
    pub node: String,
    /// Present only on the node that was suspended, the first time it runs
    /// after a resume.
    pub resume: Option<ResumePayload>,
}

pub type NodeHandler =
    Arc<dyn Fn(GraphState, NodeContext) -> BoxFuture<'static, Result<StateUpdate>> + Send + Sync>;

pub type InterruptBuilder = Arc<dyn Fn(&GraphState) -> InterruptRequest + Send + Sync>;

/// A named step of a state machine.
///
/// A node marked with [`Node::interrupt_before`] suspends the machine before
/// it runs. The interrupt builder describes what the human is asked to review.
#[derive(Clone)]
pub struct Node {
    pub name: String,
    pub(crate) handler: NodeHandler,
    pub(crate) interrupt: Option<InterruptBuilder>,
}

impl Node {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(GraphState, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |state, ctx| Box::pin(handler(state, ctx))),
            interrupt: None,
        }
    }

    /// Suspend before this node and ask for a human decision.
    pub fn interrupt_before<F>(mut self, build: F) -> Self
    where
        F: Fn(&GraphState) -> InterruptRequest + Send + Sync + 'static,
    {
        self.interrupt = Some(Arc::new(build));
        self
    }

    pub fn is_interrupt(&self) -> bool {
        self.interrupt.is_some()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("interrupt", &self.interrupt.is_some())
            .finish()
    }
}
