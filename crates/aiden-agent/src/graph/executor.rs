use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use aiden_core::error::{AidenError, Result};
use aiden_core::event::{types as event_types, Event, EventSink};
use aiden_core::types::{InterruptRequest, ResumePayload};

use super::edge::{Router, Transition, END};
use super::node::{Node, NodeContext};
use super::state::{GraphState, StateSchema, CURRENT_NODE, ERROR, PHASE_STATUS};
use crate::checkpoint::{Checkpoint, CheckpointStore, RunStatus};

/// How a call to execute, resume or recover ended. Failures are errors.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The machine reached the terminal marker.
    Completed { state: GraphState },
    /// The machine paused before an interrupt node and waits for `resume`.
    Suspended {
        resume_token: String,
        interrupt: InterruptRequest,
        state: GraphState,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &GraphState {
        match self {
            Self::Completed { state } | Self::Suspended { state, .. } => state,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// Collects nodes and transitions, then validates them into a [`CompiledGraph`].
pub struct GraphBuilder {
    name: String,
    schema: StateSchema,
    nodes: Vec<Node>,
    transitions: Vec<(String, Transition)>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>, schema: StateSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            nodes: Vec::new(),
            transitions: Vec::new(),
            entry: None,
        }
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.transitions
            .push((from.to_string(), Transition::Next(to.to_string())));
        self
    }

    pub fn add_conditional_edges<F, I>(mut self, from: &str, router: F, branches: I) -> Self
    where
        F: Fn(&GraphState) -> std::result::Result<String, String> + Send + Sync + 'static,
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let router: Router = Arc::new(router);
        let branches: BTreeMap<String, String> = branches
            .into_iter()
            .map(|(label, to)| (label.to_string(), to.to_string()))
            .collect();
        self.transitions
            .push((from.to_string(), Transition::Route { router, branches }));
        self
    }

    pub fn set_entry(mut self, node: &str) -> Self {
        self.entry = Some(node.to_string());
        self
    }

    /// Validate the graph and bind it to a checkpoint store.
    pub fn compile(self, checkpoints: Arc<CheckpointStore>) -> Result<CompiledGraph> {
        let invalid = |msg: String| AidenError::InvalidGraph(format!("{}: {}", self.name, msg));

        let mut nodes = HashMap::new();
        for node in self.nodes {
            if node.name == END {
                return Err(invalid(format!("'{}' is reserved", END)));
            }
            if nodes.contains_key(&node.name) {
                return Err(invalid(format!("duplicate node '{}'", node.name)));
            }
            nodes.insert(node.name.clone(), node);
        }

        let entry = self
            .entry
            .ok_or_else(|| invalid("no entry node".to_string()))?;
        if !nodes.contains_key(&entry) {
            return Err(invalid(format!("entry node '{}' does not exist", entry)));
        }

        let mut transitions: HashMap<String, Transition> = HashMap::new();
        for (from, transition) in self.transitions {
            if !nodes.contains_key(&from) {
                return Err(invalid(format!("edge from unknown node '{}'", from)));
            }
            if let Transition::Route { branches, .. } = &transition {
                if branches.is_empty() {
                    return Err(invalid(format!("router on '{}' has no branches", from)));
                }
            }
            for target in transition.targets() {
                if target != END && !nodes.contains_key(target) {
                    return Err(invalid(format!(
                        "edge '{}' -> '{}' targets unknown node",
                        from, target
                    )));
                }
            }
            if transitions.insert(from.clone(), transition).is_some() {
                return Err(invalid(format!("node '{}' has more than one transition", from)));
            }
        }
        if let Some(orphan) = nodes.keys().find(|n| !transitions.contains_key(*n)) {
            return Err(invalid(format!("node '{}' has no outgoing transition", orphan)));
        }

        // Reachability from the entry node.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([entry.as_str()]);
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node) || node == END {
                continue;
            }
            queue.extend(transitions[node].targets());
        }
        if let Some(unreachable) = nodes.keys().find(|n| !seen.contains(n.as_str())) {
            return Err(invalid(format!("node '{}' is unreachable", unreachable)));
        }
        if !seen.contains(END) {
            return Err(invalid("the terminal marker is unreachable".to_string()));
        }

        Ok(CompiledGraph {
            name: self.name,
            schema: self.schema,
            nodes,
            transitions,
            entry,
            checkpoints,
            events: None,
        })
    }
}

/// A validated, checkpointed state machine.
///
/// Every node transition writes a new checkpoint version before the next node
/// starts, so a thread can be resumed or recovered from the database alone.
pub struct CompiledGraph {
    name: String,
    schema: StateSchema,
    nodes: HashMap<String, Node>,
    transitions: HashMap<String, Transition>,
    entry: String,
    checkpoints: Arc<CheckpointStore>,
    events: Option<Arc<dyn EventSink>>,
}

impl CompiledGraph {
    /// Publish node enter/exit events to `sink`.
    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Start a fresh thread from the entry node.
    pub async fn execute(&self, input: Map<String, Value>, thread_id: &str) -> Result<RunOutcome> {
        if self.checkpoints.load_latest(thread_id)?.is_some() {
            return Err(AidenError::InvalidState(format!(
                "thread '{}' already has checkpoints",
                thread_id
            )));
        }
        let state = self.schema.initial_state(input)?;
        info!(graph = %self.name, thread_id, "Starting state machine");
        self.run_from(thread_id, state, self.entry.clone(), 0, None)
            .await
    }

    /// Continue a suspended thread, feeding `payload` to the interrupted node.
    pub async fn resume(&self, thread_id: &str, payload: ResumePayload) -> Result<RunOutcome> {
        let cp = self.latest(thread_id)?;
        if cp.status != RunStatus::Suspended {
            return Err(AidenError::InvalidState(format!(
                "thread '{}' is {}, not suspended",
                thread_id,
                cp.status.as_str()
            )));
        }
        let next = cp.next_node.ok_or_else(|| {
            AidenError::Checkpoint(format!("suspended thread '{}' has no next node", thread_id))
        })?;
        let mut state = cp.state;
        state.set(PHASE_STATUS, json!("running"));
        info!(graph = %self.name, thread_id, node = %next, decision = %payload.decision, "Resuming state machine");
        self.run_from(thread_id, state, next, cp.version, Some(payload))
            .await
    }

    /// Continue a thread whose process stopped between nodes.
    pub async fn recover(&self, thread_id: &str) -> Result<RunOutcome> {
        let cp = self.latest(thread_id)?;
        if cp.status != RunStatus::Running {
            return Err(AidenError::InvalidState(format!(
                "thread '{}' is {}, only running threads can be recovered",
                thread_id,
                cp.status.as_str()
            )));
        }
        let next = cp.next_node.ok_or_else(|| {
            AidenError::Checkpoint(format!("running thread '{}' has no next node", thread_id))
        })?;
        info!(graph = %self.name, thread_id, node = %next, "Recovering state machine");
        self.run_from(thread_id, cp.state, next, cp.version, None)
            .await
    }

    /// Last checkpoint, without advancing anything.
    pub fn get_state(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.checkpoints.load_latest(thread_id)
    }

    pub fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        self.checkpoints.history(thread_id)
    }

    fn latest(&self, thread_id: &str) -> Result<Checkpoint> {
        self.checkpoints
            .load_latest(thread_id)?
            .ok_or_else(|| AidenError::not_found("Thread", thread_id))
    }

    async fn run_from(
        &self,
        thread_id: &str,
        mut state: GraphState,
        start: String,
        mut version: u64,
        mut resume: Option<ResumePayload>,
    ) -> Result<RunOutcome> {
        let mut current = start;
        loop {
            if current == END {
                version += 1;
                self.save(thread_id, version, RunStatus::Completed, None, None, &state)?;
                info!(graph = %self.name, thread_id, "State machine completed");
                return Ok(RunOutcome::Completed { state });
            }

            let node = self.nodes.get(&current).ok_or_else(|| {
                AidenError::Checkpoint(format!("checkpoint names unknown node '{}'", current))
            })?;

            if resume.is_none() {
                if let Some(build) = &node.interrupt {
                    state.set(PHASE_STATUS, json!("hitl_review"));
                    let interrupt = build(&state);
                    version += 1;
                    self.save(
                        thread_id,
                        version,
                        RunStatus::Suspended,
                        Some(current.clone()),
                        Some(interrupt.clone()),
                        &state,
                    )?;
                    info!(
                        graph = %self.name,
                        thread_id,
                        node = %current,
                        review_type = %interrupt.review_type,
                        "State machine suspended for review"
                    );
                    return Ok(RunOutcome::Suspended {
                        resume_token: thread_id.to_string(),
                        interrupt,
                        state,
                    });
                }
            }

            info!(graph = %self.name, thread_id, node = %current, "Executing graph node");
            self.emit(&state, event_types::NODE_ENTER, json!({ "node_name": current }));
            let started = Instant::now();

            let ctx = NodeContext {
                thread_id: thread_id.to_string(),
                node: current.clone(),
                resume: resume.take(),
            };
            let outcome = match (node.handler)(state.clone(), ctx).await {
                Ok(update) => {
                    let mut next_state = state.clone();
                    self.schema.apply(&mut next_state, update).map(|_| next_state)
                }
                Err(e) => Err(e),
            };
            let mut next_state = match outcome {
                Ok(s) => s,
                Err(e) => {
                    let message = e.to_string();
                    error!(graph = %self.name, thread_id, node = %current, error = %message, "Graph node failed");
                    self.fail(thread_id, version + 1, &current, state, &message)?;
                    return Err(AidenError::NodeFailed {
                        node: current,
                        message,
                    });
                }
            };
            next_state.set(CURRENT_NODE, json!(current));
            state = next_state;

            let duration_ms = started.elapsed().as_millis() as u64;
            self.emit(
                &state,
                event_types::NODE_EXIT,
                json!({ "node_name": current, "duration_ms": duration_ms }),
            );
            debug!(graph = %self.name, node = %current, duration_ms, "Node execution complete");

            let next = match self.transitions[&current].resolve(&state) {
                Ok(next) => next,
                Err(discriminant) => {
                    let err = AidenError::Routing {
                        node: current.clone(),
                        discriminant,
                    };
                    error!(graph = %self.name, thread_id, error = %err, "Routing failed");
                    self.fail(thread_id, version + 1, &current, state, &err.to_string())?;
                    return Err(err);
                }
            };

            version += 1;
            self.save(thread_id, version, RunStatus::Running, Some(next.clone()), None, &state)?;
            current = next;
        }
    }

    fn fail(
        &self,
        thread_id: &str,
        version: u64,
        node: &str,
        mut state: GraphState,
        message: &str,
    ) -> Result<()> {
        state.set(PHASE_STATUS, json!("failed"));
        state.set(ERROR, json!(message));
        self.checkpoints.save(&Checkpoint {
            thread_id: thread_id.to_string(),
            version,
            status: RunStatus::Failed,
            last_node: Some(node.to_string()),
            next_node: None,
            interrupt: None,
            state,
            created_at: Utc::now(),
        })
    }

    fn save(
        &self,
        thread_id: &str,
        version: u64,
        status: RunStatus,
        next_node: Option<String>,
        interrupt: Option<InterruptRequest>,
        state: &GraphState,
    ) -> Result<()> {
        self.checkpoints.save(&Checkpoint {
            thread_id: thread_id.to_string(),
            version,
            status,
            last_node: state.get_str(CURRENT_NODE).map(str::to_string),
            next_node,
            interrupt,
            state: state.clone(),
            created_at: Utc::now(),
        })
    }

    fn emit(&self, state: &GraphState, event_type: &str, data: Value) {
        let (Some(sink), Some(project_id)) = (&self.events, state.get_str("project_id")) else {
            return;
        };
        let mut event = Event::new(event_type, project_id, data).with_agent(self.name.clone());
        if let Some(execution_id) = state.get_str("execution_id") {
            event = event.with_execution(execution_id);
        }
        sink.publish_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::StateUpdate;
    use aiden_core::types::Decision;
    use aiden_test_utils::RecordingSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn schema() -> StateSchema {
        StateSchema::new()
            .overwrite("project_id", Value::Null)
            .overwrite("execution_id", Value::Null)
            .overwrite("flag", json!("go"))
            .overwrite("decision", Value::Null)
            .append("trail")
    }

    fn step(name: &'static str) -> Node {
        Node::new(name, move |_state, _ctx| async move {
            Ok(StateUpdate::new().set("trail", json!(name)))
        })
    }

    fn trail(state: &GraphState) -> Vec<String> {
        state.get_as("trail").unwrap()
    }

    fn input() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("project_id".into(), json!("p-1"));
        m.insert("execution_id".into(), json!("e-1"));
        m
    }

    fn linear(store: Arc<CheckpointStore>) -> CompiledGraph {
        GraphBuilder::new("linear", schema())
            .add_node(step("a"))
            .add_node(step("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry("a")
            .compile(store)
            .unwrap()
    }

    fn with_review(store: Arc<CheckpointStore>) -> CompiledGraph {
        let review = Node::new("review", |_state, ctx: NodeContext| async move {
            let decision = ctx.resume.map(|p| p.decision.as_str().to_string());
            Ok(StateUpdate::new()
                .set("trail", json!("review"))
                .set("decision", json!(decision)))
        })
        .interrupt_before(|state| InterruptRequest {
            node: "review".into(),
            review_type: "final_review".into(),
            message: "please look".into(),
            content: json!({ "trail": state.get("trail").cloned() }),
        });
        GraphBuilder::new("reviewed", schema())
            .add_node(step("draft"))
            .add_node(review)
            .add_node(step("publish"))
            .add_edge("draft", "review")
            .add_conditional_edges(
                "review",
                |s: &GraphState| match s.get_str("decision") {
                    Some("approved") => Ok("approved".to_string()),
                    Some("revision_requested") => Ok("revise".to_string()),
                    other => Err(other.unwrap_or("none").to_string()),
                },
                [("approved", "publish"), ("revise", "draft")],
            )
            .add_edge("publish", END)
            .set_entry("draft")
            .compile(store)
            .unwrap()
    }

    fn payload(decision: Decision) -> ResumePayload {
        ResumePayload {
            decision,
            feedback: Some("ok".into()),
            edits: None,
            decided_by: Some("reviewer".into()),
            resolved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn linear_graph_completes_with_versioned_checkpoints() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let graph = linear(store.clone());
        let outcome = graph.execute(input(), "t1").await.unwrap();
        let RunOutcome::Completed { state } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(trail(&state), vec!["a", "b"]);
        assert_eq!(state.get_str(CURRENT_NODE), Some("b"));

        let history = graph.history("t1").unwrap();
        let versions: Vec<u64> = history.iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(history[0].next_node.as_deref(), Some("b"));
        assert_eq!(history[2].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn executing_an_existing_thread_is_rejected() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let graph = linear(store);
        graph.execute(input(), "t1").await.unwrap();
        let err = graph.execute(input(), "t1").await.unwrap_err();
        assert!(matches!(err, AidenError::InvalidState(_)));
    }

    #[tokio::test]
    async fn suspends_before_interrupt_node_and_resumes() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let graph = with_review(store.clone());

        let outcome = graph.execute(input(), "t1").await.unwrap();
        let RunOutcome::Suspended {
            resume_token,
            interrupt,
            state,
        } = outcome
        else {
            panic!("expected suspension");
        };
        assert_eq!(resume_token, "t1");
        assert_eq!(interrupt.review_type, "final_review");
        assert_eq!(interrupt.content["trail"], json!(["draft"]));
        assert_eq!(state.phase_status(), Some("hitl_review"));
        assert_eq!(trail(&state), vec!["draft"]);

        let cp = graph.get_state("t1").unwrap().unwrap();
        assert_eq!(cp.status, RunStatus::Suspended);
        assert_eq!(cp.next_node.as_deref(), Some("review"));
        // get_state is read-only
        assert_eq!(graph.get_state("t1").unwrap().unwrap().version, cp.version);

        let outcome = graph.resume("t1", payload(Decision::Approved)).await.unwrap();
        let RunOutcome::Completed { state } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(trail(&state), vec!["draft", "review", "publish"]);
        assert_eq!(state.phase_status(), Some("running"));
    }

    #[tokio::test]
    async fn revision_loops_back_and_suspends_again() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let graph = with_review(store);
        graph.execute(input(), "t1").await.unwrap();
        let outcome = graph
            .resume("t1", payload(Decision::RevisionRequested))
            .await
            .unwrap();
        assert!(outcome.is_suspended());
        assert_eq!(trail(outcome.state()), vec!["draft", "review", "draft"]);
    }

    #[tokio::test]
    async fn resume_requires_a_suspended_thread() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let graph = with_review(store.clone());
        let err = graph.resume("nope", payload(Decision::Approved)).await.unwrap_err();
        assert!(matches!(err, AidenError::NotFound { .. }));

        let done = linear(store);
        done.execute(input(), "t2").await.unwrap();
        let err = done.resume("t2", payload(Decision::Approved)).await.unwrap_err();
        assert!(matches!(err, AidenError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unmatched_route_fails_with_routing_error() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let graph = with_review(store);
        graph.execute(input(), "t1").await.unwrap();
        let err = graph.resume("t1", payload(Decision::Rejected)).await.unwrap_err();
        match err {
            AidenError::Routing { node, discriminant } => {
                assert_eq!(node, "review");
                assert_eq!(discriminant, "rejected");
            }
            other => panic!("unexpected error {other:?}"),
        }
        let cp = graph.get_state("t1").unwrap().unwrap();
        assert_eq!(cp.status, RunStatus::Failed);
        assert_eq!(cp.state.phase_status(), Some("failed"));
    }

    #[tokio::test]
    async fn node_error_writes_failed_checkpoint_without_its_update() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let boom = Node::new("boom", |_s, _c| async {
            Err::<StateUpdate, _>(AidenError::LlmRequest("HTTP 401: bad key".into()))
        });
        let graph = GraphBuilder::new("failing", schema())
            .add_node(step("a"))
            .add_node(boom)
            .add_edge("a", "boom")
            .add_edge("boom", END)
            .set_entry("a")
            .compile(store)
            .unwrap();

        let err = graph.execute(input(), "t1").await.unwrap_err();
        assert!(matches!(err, AidenError::NodeFailed { ref node, .. } if node == "boom"));

        let cp = graph.get_state("t1").unwrap().unwrap();
        assert_eq!(cp.status, RunStatus::Failed);
        assert_eq!(cp.state.phase_status(), Some("failed"));
        assert!(cp.state.get_str(ERROR).unwrap().contains("bad key"));
        assert_eq!(trail(&cp.state), vec!["a"]);
    }

    #[tokio::test]
    async fn undeclared_field_in_update_fails_the_node() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let sloppy = Node::new("sloppy", |_s, _c| async {
            Ok(StateUpdate::new().set("nonsense", 1))
        });
        let graph = GraphBuilder::new("sloppy", schema())
            .add_node(sloppy)
            .add_edge("sloppy", END)
            .set_entry("sloppy")
            .compile(store)
            .unwrap();
        let err = graph.execute(input(), "t1").await.unwrap_err();
        assert!(matches!(err, AidenError::NodeFailed { .. }));
    }

    #[tokio::test]
    async fn recover_reruns_from_next_node() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let flaky = Node::new("b", move |_s, _c| {
            let n = counted.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AidenError::Retrieval("index offline".into()))
                } else {
                    Ok(StateUpdate::new().set("trail", json!("b")))
                }
            }
        });
        let graph = GraphBuilder::new("recoverable", schema())
            .add_node(step("a"))
            .add_node(flaky)
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry("a")
            .compile(store.clone())
            .unwrap();
        assert!(graph.execute(input(), "t1").await.is_err());
        // Failed threads are not recoverable
        assert!(matches!(
            graph.recover("t1").await.unwrap_err(),
            AidenError::InvalidState(_)
        ));

        // Simulate a crash between nodes: latest checkpoint is still running.
        let graph2 = GraphBuilder::new("recoverable", schema())
            .add_node(step("a"))
            .add_node(step("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry("a")
            .compile(store.clone())
            .unwrap();
        let mut cp = store.history("t1").unwrap().remove(0);
        cp.thread_id = "t2".into();
        store.save(&cp).unwrap();
        let RunOutcome::Completed { state } = graph2.recover("t2").await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(trail(&state), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn publishes_node_enter_and_exit() {
        let store = Arc::new(CheckpointStore::in_memory().unwrap());
        let sink = Arc::new(RecordingSink::default());
        let graph = linear(store).with_events(sink.clone());
        graph.execute(input(), "t1").await.unwrap();

        let events = sink.events();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                event_types::NODE_ENTER,
                event_types::NODE_EXIT,
                event_types::NODE_ENTER,
                event_types::NODE_EXIT
            ]
        );
        assert_eq!(events[0].data["node_name"], "a");
        assert!(events[1].data["duration_ms"].is_u64());
        assert_eq!(events[0].execution_id.as_deref(), Some("e-1"));
        assert_eq!(events[0].agent_name.as_deref(), Some("linear"));
    }

    fn build_err(builder: GraphBuilder) -> String {
        match builder.compile(Arc::new(CheckpointStore::in_memory().unwrap())) {
            Err(AidenError::InvalidGraph(msg)) => msg,
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("graph should not compile"),
        }
    }

    #[test]
    fn validation_rejects_malformed_graphs() {
        let msg = build_err(GraphBuilder::new("g", schema()).add_node(step("a")).add_edge("a", END));
        assert!(msg.contains("no entry"));

        let msg = build_err(
            GraphBuilder::new("g", schema())
                .add_node(step("a"))
                .add_node(step("a"))
                .add_edge("a", END)
                .set_entry("a"),
        );
        assert!(msg.contains("duplicate"));

        let msg = build_err(
            GraphBuilder::new("g", schema())
                .add_node(step("a"))
                .add_edge("a", "ghost")
                .set_entry("a"),
        );
        assert!(msg.contains("unknown node"));

        let msg = build_err(
            GraphBuilder::new("g", schema())
                .add_node(step("a"))
                .add_edge("a", END)
                .add_edge("a", END)
                .set_entry("a"),
        );
        assert!(msg.contains("more than one"));

        let msg = build_err(
            GraphBuilder::new("g", schema())
                .add_node(step("a"))
                .add_node(step("b"))
                .add_edge("a", END)
                .add_edge("b", END)
                .set_entry("a"),
        );
        assert!(msg.contains("unreachable"));

        let msg = build_err(
            GraphBuilder::new("g", schema())
                .add_node(step("a"))
                .add_node(step("b"))
                .add_edge("a", "b")
                .add_edge("b", "a")
                .set_entry("a"),
        );
        assert!(msg.contains("terminal"));

        let msg = build_err(
            GraphBuilder::new("g", schema())
                .add_node(step("a"))
                .add_conditional_edges("a", |_s: &GraphState| Ok("x".to_string()), [])
                .set_entry("a"),
        );
        assert!(msg.contains("no branches"));

        let msg = build_err(
            GraphBuilder::new("g", schema())
                .add_node(step("a"))
                .set_entry("a"),
        );
        assert!(msg.contains("no outgoing"));
    }
}
