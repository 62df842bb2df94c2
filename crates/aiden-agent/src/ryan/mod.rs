//! Ryan, the analysis-phase agent.
//!
//! Turns a development request into a requirements specification and a
//! traceability matrix:
//!
//! ```text
//! load_document -> retrieve_context -> extract_requirements -> classify_requirements
//!   -> detect_ambiguities -> [needs_review] hitl_ambiguity_review -> refine_requirements
//!                         -> [no_issues]    refine_requirements
//!   -> build_traceability -> generate_spec_document -> hitl_final_review
//!   -> [approved] finalize_deliverables -> END
//!   -> [revision] refine_requirements
//! ```

pub mod nodes;
pub mod prompts;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};

use aiden_core::config::{AppConfig, RetrievalConfig};
use aiden_core::error::Result;
use aiden_core::traits::{ModelProvider, Retriever};
use aiden_core::types::InterruptRequest;

use crate::checkpoint::CheckpointStore;
use crate::graph::{CompiledGraph, GraphBuilder, GraphState, Node, NodeContext, StateUpdate, END};
use nodes::*;

pub use state::{ryan_schema, Ambiguity, Category, Priority, Requirement, TraceabilityEntry};

pub const AGENT_NAME: &str = "ryan";

/// Collaborators the analysis nodes call into.
pub struct RyanDeps {
    pub retriever: Arc<dyn Retriever>,
    pub models: Arc<dyn ModelProvider>,
    pub retrieval: RetrievalConfig,
    /// Revision cycles allowed after the final review. `None` is unbounded.
    pub max_revisions: Option<u32>,
}

impl RyanDeps {
    pub fn from_config(
        retriever: Arc<dyn Retriever>,
        models: Arc<dyn ModelProvider>,
        config: &AppConfig,
    ) -> Self {
        Self {
            retriever,
            models,
            retrieval: config.retrieval.clone(),
            max_revisions: config.pipeline.max_revisions,
        }
    }
}

/// Routes on detected ambiguities. A missing list counts as empty.
pub fn route_ambiguities(state: &GraphState) -> std::result::Result<String, String> {
    match state.get("ambiguities") {
        None => Ok("no_issues".to_string()),
        Some(Value::Array(items)) if items.is_empty() => Ok("no_issues".to_string()),
        Some(Value::Array(_)) => Ok("needs_review".to_string()),
        Some(other) => Err(other.to_string()),
    }
}

/// Routes on the final review decision. Rejection loops back like a
/// revision request.
pub fn route_final_review(state: &GraphState) -> std::result::Result<String, String> {
    match state.get_str("hitl_status") {
        Some("approved") => Ok("approved".to_string()),
        Some("revision_requested") | Some("rejected") => Ok("revision".to_string()),
        Some(other) => Err(other.to_string()),
        None => Err("none".to_string()),
    }
}

fn all_requirements_value(state: &GraphState) -> Value {
    let mut all = Vec::new();
    for field in ["functional_requirements", "non_functional_requirements"] {
        if let Some(Value::Array(items)) = state.get(field) {
            all.extend(items.iter().cloned());
        }
    }
    Value::Array(all)
}

fn ambiguity_interrupt(state: &GraphState) -> InterruptRequest {
    let ambiguities = state.get("ambiguities").cloned().unwrap_or_else(|| json!([]));
    let count = ambiguities.as_array().map(Vec::len).unwrap_or(0);
    InterruptRequest {
        node: HITL_AMBIGUITY_REVIEW.to_string(),
        review_type: "ambiguity_review".to_string(),
        message: format!("{} ambiguities detected in requirements. Please review.", count),
        content: json!({
            "ambiguities": ambiguities,
            "requirements": all_requirements_value(state),
        }),
    }
}

fn final_review_interrupt(state: &GraphState) -> InterruptRequest {
    InterruptRequest {
        node: HITL_FINAL_REVIEW.to_string(),
        review_type: "final_deliverable_review".to_string(),
        message: "Requirements specification and traceability matrix are ready for review."
            .to_string(),
        content: json!({
            "requirements_spec": state.get("requirements_spec"),
            "traceability_matrix": state.get("traceability_matrix"),
        }),
    }
}

fn with_deps<F, Fut>(
    deps: &Arc<RyanDeps>,
    node: F,
) -> impl Fn(GraphState, NodeContext) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<RyanDeps>, GraphState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
{
    let deps = deps.clone();
    move |state, _ctx| node(deps.clone(), state)
}

/// Build the analysis state machine.
pub fn build_ryan(deps: RyanDeps, checkpoints: Arc<CheckpointStore>) -> Result<CompiledGraph> {
    let deps = Arc::new(deps);
    GraphBuilder::new(AGENT_NAME, ryan_schema())
        .add_node(Node::new(LOAD_DOCUMENT, with_deps(&deps, load_document)))
        .add_node(Node::new(RETRIEVE_CONTEXT, with_deps(&deps, retrieve_context)))
        .add_node(Node::new(EXTRACT_REQUIREMENTS, with_deps(&deps, extract_requirements)))
        .add_node(Node::new(CLASSIFY_REQUIREMENTS, |state, _ctx| {
            classify_requirements(state)
        }))
        .add_node(Node::new(DETECT_AMBIGUITIES, with_deps(&deps, detect_ambiguities)))
        .add_node(
            Node::new(HITL_AMBIGUITY_REVIEW, record_review).interrupt_before(ambiguity_interrupt),
        )
        .add_node(Node::new(REFINE_REQUIREMENTS, with_deps(&deps, refine_requirements)))
        .add_node(Node::new(BUILD_TRACEABILITY, with_deps(&deps, build_traceability)))
        .add_node(Node::new(
            GENERATE_SPEC_DOCUMENT,
            with_deps(&deps, generate_spec_document),
        ))
        .add_node(Node::new(HITL_FINAL_REVIEW, record_review).interrupt_before(final_review_interrupt))
        .add_node(Node::new(FINALIZE_DELIVERABLES, |state, _ctx| {
            finalize_deliverables(state)
        }))
        .set_entry(LOAD_DOCUMENT)
        .add_edge(LOAD_DOCUMENT, RETRIEVE_CONTEXT)
        .add_edge(RETRIEVE_CONTEXT, EXTRACT_REQUIREMENTS)
        .add_edge(EXTRACT_REQUIREMENTS, CLASSIFY_REQUIREMENTS)
        .add_edge(CLASSIFY_REQUIREMENTS, DETECT_AMBIGUITIES)
        .add_conditional_edges(
            DETECT_AMBIGUITIES,
            route_ambiguities,
            [
                ("needs_review", HITL_AMBIGUITY_REVIEW),
                ("no_issues", REFINE_REQUIREMENTS),
            ],
        )
        .add_edge(HITL_AMBIGUITY_REVIEW, REFINE_REQUIREMENTS)
        .add_edge(REFINE_REQUIREMENTS, BUILD_TRACEABILITY)
        .add_edge(BUILD_TRACEABILITY, GENERATE_SPEC_DOCUMENT)
        .add_edge(GENERATE_SPEC_DOCUMENT, HITL_FINAL_REVIEW)
        .add_conditional_edges(
            HITL_FINAL_REVIEW,
            route_final_review,
            [
                ("approved", FINALIZE_DELIVERABLES),
                ("revision", REFINE_REQUIREMENTS),
            ],
        )
        .add_edge(FINALIZE_DELIVERABLES, END)
        .compile(checkpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn state_with(field: &str, value: Value) -> GraphState {
        let mut input = Map::new();
        input.insert(field.to_string(), value);
        ryan_schema().initial_state(input).unwrap()
    }

    #[test]
    fn ambiguity_router() {
        assert_eq!(route_ambiguities(&state_with("ambiguities", json!([]))).unwrap(), "no_issues");
        assert_eq!(route_ambiguities(&state_with("ambiguities", Value::Null)).unwrap(), "no_issues");
        assert_eq!(
            route_ambiguities(&state_with("ambiguities", json!([{"requirement_id": "REQ-001"}])))
                .unwrap(),
            "needs_review"
        );
        assert!(route_ambiguities(&state_with("ambiguities", json!("lots"))).is_err());
    }

    #[test]
    fn final_review_router() {
        for (status, label) in [
            ("approved", "approved"),
            ("revision_requested", "revision"),
            ("rejected", "revision"),
        ] {
            assert_eq!(route_final_review(&state_with("hitl_status", json!(status))).unwrap(), label);
        }
        assert_eq!(
            route_final_review(&state_with("hitl_status", json!("pending"))).unwrap_err(),
            "pending"
        );
        assert_eq!(route_final_review(&state_with("hitl_status", Value::Null)).unwrap_err(), "none");
    }

    #[test]
    fn ambiguity_interrupt_counts_items() {
        let mut input = Map::new();
        input.insert("ambiguities".into(), json!([{}, {}]));
        input.insert("functional_requirements".into(), json!([{"id": "REQ-001"}]));
        input.insert("non_functional_requirements".into(), json!([{"id": "REQ-002"}]));
        let state = ryan_schema().initial_state(input).unwrap();
        let interrupt = ambiguity_interrupt(&state);
        assert_eq!(interrupt.message, "2 ambiguities detected in requirements. Please review.");
        assert_eq!(interrupt.content["requirements"].as_array().unwrap().len(), 2);
        assert_eq!(interrupt.node, HITL_AMBIGUITY_REVIEW);
    }
}
