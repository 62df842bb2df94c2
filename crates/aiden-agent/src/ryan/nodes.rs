use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use aiden_core::error::{AidenError, Result};
use aiden_core::traits::{ChatRequest, ChatResponse};
use aiden_core::types::{ContextSnippet, RetrievalFilter, TaskType};

use super::prompts::{self, render, SYSTEM_PROMPT};
use super::state::{Ambiguity, Category, Requirement, TraceabilityEntry, NO_DOCUMENT};
use super::RyanDeps;
use crate::graph::state::{CURRENT_NODE, PHASE_STATUS};
use crate::graph::{GraphState, NodeContext, StateUpdate};

pub const LOAD_DOCUMENT: &str = "load_document";
pub const RETRIEVE_CONTEXT: &str = "retrieve_context";
pub const EXTRACT_REQUIREMENTS: &str = "extract_requirements";
pub const CLASSIFY_REQUIREMENTS: &str = "classify_requirements";
pub const DETECT_AMBIGUITIES: &str = "detect_ambiguities";
pub const HITL_AMBIGUITY_REVIEW: &str = "hitl_ambiguity_review";
pub const REFINE_REQUIREMENTS: &str = "refine_requirements";
pub const BUILD_TRACEABILITY: &str = "build_traceability";
pub const GENERATE_SPEC_DOCUMENT: &str = "generate_spec_document";
pub const HITL_FINAL_REVIEW: &str = "hitl_final_review";
pub const FINALIZE_DELIVERABLES: &str = "finalize_deliverables";

pub const DOCUMENT_NOT_FOUND: &str = "[Document content not found in index]";
const NO_CONTEXT: &str = "No relevant context found.";
const TRACEABILITY_DOC_CHARS: usize = 5000;
const SPEC_CONTEXT_CHARS: usize = 3000;

fn project_id(state: &GraphState) -> Result<&str> {
    state
        .get_str("project_id")
        .ok_or_else(|| AidenError::InvalidState("state has no project_id".into()))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Render retrieved snippets for a prompt.
pub fn format_context(snippets: &[ContextSnippet]) -> String {
    if snippets.is_empty() {
        return NO_CONTEXT.to_string();
    }
    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let source = s
                .metadata
                .get("doc_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            format!(
                "[Context {} | Source: {} | Relevance: {:.2}]\n{}",
                i + 1,
                source,
                s.relevance_score,
                s.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn requirement_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^REQ-\d+$").ok())
        .as_ref()
}

/// Accept both `{"<key>": [...]}` and a bare array.
fn parse_list<T: DeserializeOwned>(value: Value, key: &str) -> Result<Vec<T>> {
    let items = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map
            .remove(key)
            .ok_or_else(|| AidenError::LlmParse(format!("structured output has no '{}'", key)))?,
        other => {
            return Err(AidenError::LlmParse(format!(
                "expected an object with '{}', got {}",
                key, other
            )))
        }
    };
    serde_json::from_value(items)
        .map_err(|e| AidenError::LlmParse(format!("invalid '{}' entries: {}", key, e)))
}

fn all_requirements(state: &GraphState) -> Result<Vec<Requirement>> {
    let mut all: Vec<Requirement> = state.get_as("functional_requirements")?;
    all.extend(state.get_as::<Vec<Requirement>>("non_functional_requirements")?);
    Ok(all)
}

fn partition(requirements: Vec<Requirement>) -> (Vec<Requirement>, Vec<Requirement>) {
    requirements
        .into_iter()
        .partition(|r| r.category == Category::Functional)
}

fn pretty(value: &impl serde::Serialize) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn call_model(
    deps: &RyanDeps,
    task: TaskType,
    prompt: String,
    schema: Option<(&str, Value)>,
) -> Result<ChatResponse> {
    let model = deps.models.model_for_task(task)?;
    let mut request = ChatRequest::new(SYSTEM_PROMPT, prompt);
    if let Some((name, schema)) = schema {
        request = request.with_schema(name, schema);
    }
    let response = model.complete(request).await?;
    debug!(
        task = %task,
        model = %model.name(),
        tokens = response.usage.total(),
        cost_usd = response.cost_usd,
        "Model call finished"
    );
    Ok(response)
}

/// Record a model call in the message log and the running totals.
fn accounted(update: StateUpdate, node: &str, response: &ChatResponse) -> StateUpdate {
    update
        .set(
            "messages",
            json!({ "role": "assistant", "node": node, "content": response.text }),
        )
        .set("total_tokens", response.usage.total())
        .set("total_cost", response.cost_usd)
}

fn structured(response: &ChatResponse) -> Result<Value> {
    response
        .structured
        .clone()
        .ok_or_else(|| AidenError::LlmParse("model returned no structured output".into()))
}

pub(crate) async fn load_document(deps: Arc<RyanDeps>, state: GraphState) -> Result<StateUpdate> {
    let project_id = project_id(&state)?;
    let doc_id = state.get_str("dev_request_doc_id").unwrap_or(NO_DOCUMENT);
    if doc_id == NO_DOCUMENT {
        return Err(AidenError::InvalidState(
            "no development request document".into(),
        ));
    }

    let filter = RetrievalFilter {
        document_id: Some(doc_id.to_string()),
        doc_type: None,
    };
    let chunks = deps
        .retriever
        .retrieve(
            prompts::DOCUMENT_QUERY,
            project_id,
            deps.retrieval.document_top_k,
            Some(filter),
        )
        .await?;

    let content = if chunks.is_empty() {
        warn!(project_id, document_id = doc_id, "Document has no indexed chunks");
        DOCUMENT_NOT_FOUND.to_string()
    } else {
        chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    info!(project_id, document_id = doc_id, chunks = chunks.len(), "Loaded development request");

    Ok(StateUpdate::new().set("document_content", content))
}

pub(crate) async fn retrieve_context(deps: Arc<RyanDeps>, state: GraphState) -> Result<StateUpdate> {
    let project_id = project_id(&state)?;
    let queries: Vec<String> = prompts::CONTEXT_QUERIES.iter().map(|q| q.to_string()).collect();
    let snippets = deps
        .retriever
        .retrieve_multi_query(&queries, project_id, deps.retrieval.top_k_per_query)
        .await?;
    debug!(project_id, snippets = snippets.len(), "Retrieved analysis context");
    StateUpdate::new().set_as("retrieved_context", &snippets)
}

fn requirements_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "requirements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "category": {"type": "string", "enum": ["functional", "non_functional"]},
                        "priority": {"type": "string", "enum": ["high", "medium", "low"]},
                        "source_reference": {"type": "string"},
                        "acceptance_criteria": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["id", "title", "description", "category", "priority",
                                 "source_reference", "acceptance_criteria"]
                }
            }
        },
        "required": ["requirements"]
    })
}

pub(crate) async fn extract_requirements(
    deps: Arc<RyanDeps>,
    state: GraphState,
) -> Result<StateUpdate> {
    let snippets: Vec<ContextSnippet> = state.get_as("retrieved_context")?;
    let context = format_context(&snippets);
    let prompt = render(
        prompts::EXTRACT_REQUIREMENTS_PROMPT,
        &[
            ("document_content", state.get_str("document_content").unwrap_or_default()),
            ("context", context.as_str()),
        ],
    );
    let response = call_model(
        &deps,
        TaskType::RequirementExtraction,
        prompt,
        Some(("requirements_list", requirements_schema())),
    )
    .await?;
    let requirements: Vec<Requirement> = parse_list(structured(&response)?, "requirements")?;

    if let Some(pattern) = requirement_id_pattern() {
        for r in requirements.iter().filter(|r| !pattern.is_match(&r.id)) {
            warn!(requirement_id = %r.id, "Requirement id is not shaped REQ-<digits>");
        }
    }
    info!(count = requirements.len(), "Extracted requirements");

    let update = StateUpdate::new().set_as("raw_requirements", &requirements)?;
    Ok(accounted(update, EXTRACT_REQUIREMENTS, &response))
}

pub(crate) async fn classify_requirements(state: GraphState) -> Result<StateUpdate> {
    let raw: Vec<Requirement> = state.get_as("raw_requirements")?;
    let (functional, non_functional) = partition(raw);
    debug!(
        functional = functional.len(),
        non_functional = non_functional.len(),
        "Classified requirements"
    );
    StateUpdate::new()
        .set_as("functional_requirements", &functional)?
        .set_as("non_functional_requirements", &non_functional)
}

fn ambiguities_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ambiguities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "requirement_id": {"type": "string"},
                        "description": {"type": "string"},
                        "suggestion": {"type": "string"},
                        "severity": {"type": "string", "enum": ["high", "medium", "low"]}
                    },
                    "required": ["requirement_id", "description", "suggestion", "severity"]
                }
            }
        },
        "required": ["ambiguities"]
    })
}

pub(crate) async fn detect_ambiguities(
    deps: Arc<RyanDeps>,
    state: GraphState,
) -> Result<StateUpdate> {
    let requirements = all_requirements(&state)?;
    let snippets: Vec<ContextSnippet> = state.get_as("retrieved_context")?;
    let requirements_json = pretty(&requirements)?;
    let context = format_context(&snippets);
    let prompt = render(
        prompts::DETECT_AMBIGUITIES_PROMPT,
        &[
            ("requirements", requirements_json.as_str()),
            ("context", context.as_str()),
        ],
    );
    let response = call_model(
        &deps,
        TaskType::AmbiguityDetection,
        prompt,
        Some(("ambiguity_list", ambiguities_schema())),
    )
    .await?;
    let ambiguities: Vec<Ambiguity> = parse_list(structured(&response)?, "ambiguities")?;
    info!(count = ambiguities.len(), "Detected ambiguities");

    let update = StateUpdate::new().set_as("ambiguities", &ambiguities)?;
    Ok(accounted(update, DETECT_AMBIGUITIES, &response))
}

/// Both review nodes record the human's decision and the whole payload.
pub(crate) async fn record_review(_state: GraphState, ctx: NodeContext) -> Result<StateUpdate> {
    let payload = ctx.resume.ok_or_else(|| {
        AidenError::InvalidState(format!("review node '{}' ran without a decision", ctx.node))
    })?;
    info!(node = %ctx.node, decision = %payload.decision, "Review decision received");
    StateUpdate::new()
        .set("hitl_status", payload.decision.as_str())
        .set_as("hitl_feedback", &payload)
}

/// Apply `{req_id: {field: value}}` edits by shallow merge, keeping order.
fn apply_edits(requirements: Vec<Requirement>, edits: &Map<String, Value>) -> Result<Vec<Requirement>> {
    let known: HashSet<&str> = requirements.iter().map(|r| r.id.as_str()).collect();
    for id in edits.keys().filter(|id| !known.contains(id.as_str())) {
        warn!(requirement_id = %id, "Edit targets unknown requirement, ignoring");
    }

    requirements
        .into_iter()
        .map(|req| {
            let Some(Value::Object(changes)) = edits.get(&req.id) else {
                return Ok(req);
            };
            let mut fields = match serde_json::to_value(&req)? {
                Value::Object(fields) => fields,
                _ => return Ok(req),
            };
            for (field, value) in changes {
                fields.insert(field.clone(), value.clone());
            }
            serde_json::from_value(Value::Object(fields)).map_err(|e| {
                AidenError::InvalidState(format!("edit to {} is invalid: {}", req.id, e))
            })
        })
        .collect()
}

pub(crate) async fn refine_requirements(
    deps: Arc<RyanDeps>,
    state: GraphState,
) -> Result<StateUpdate> {
    let mut update = StateUpdate::new();
    if state.get_str(CURRENT_NODE) == Some(HITL_FINAL_REVIEW) {
        let revisions = state.get_as::<u32>("revision_count")? + 1;
        if let Some(limit) = deps.max_revisions {
            if revisions > limit {
                return Err(AidenError::RevisionLimitExceeded { limit });
            }
        }
        info!(revision = revisions, "Starting revision cycle");
        update = update.set("revision_count", 1);
    }

    let requirements = all_requirements(&state)?;
    let edits = state
        .get("hitl_feedback")
        .and_then(|f| f.get("edits"))
        .and_then(Value::as_object);
    let requirements = match edits {
        Some(edits) if !edits.is_empty() => apply_edits(requirements, edits)?,
        _ => requirements,
    };
    let (functional, non_functional) = partition(requirements);

    update
        .set_as("functional_requirements", &functional)?
        .set_as("non_functional_requirements", &non_functional)
}

fn traceability_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "requirement_id": {"type": "string"},
                        "requirement_title": {"type": "string"},
                        "source_section": {"type": "string"},
                        "source_text": {"type": "string"},
                        "verification_method": {"type": "string"}
                    },
                    "required": ["requirement_id", "requirement_title", "source_section",
                                 "source_text", "verification_method"]
                }
            }
        },
        "required": ["entries"]
    })
}

pub(crate) async fn build_traceability(
    deps: Arc<RyanDeps>,
    state: GraphState,
) -> Result<StateUpdate> {
    let requirements = all_requirements(&state)?;
    let document = truncate_chars(
        state.get_str("document_content").unwrap_or_default(),
        TRACEABILITY_DOC_CHARS,
    );
    let requirements_json = pretty(&requirements)?;
    let prompt = render(
        prompts::BUILD_TRACEABILITY_PROMPT,
        &[
            ("requirements", requirements_json.as_str()),
            ("document_content", document.as_str()),
        ],
    );
    let response = call_model(
        &deps,
        TaskType::TraceabilityMapping,
        prompt,
        Some(("traceability_matrix", traceability_schema())),
    )
    .await?;
    let entries: Vec<TraceabilityEntry> = parse_list(structured(&response)?, "entries")?;
    info!(count = entries.len(), "Built traceability matrix");

    let update = StateUpdate::new().set_as("traceability_entries", &entries)?;
    Ok(accounted(update, BUILD_TRACEABILITY, &response))
}

pub(crate) async fn generate_spec_document(
    deps: Arc<RyanDeps>,
    state: GraphState,
) -> Result<StateUpdate> {
    let functional: Vec<Requirement> = state.get_as("functional_requirements")?;
    let non_functional: Vec<Requirement> = state.get_as("non_functional_requirements")?;
    let requirements: Vec<&Requirement> = functional.iter().chain(non_functional.iter()).collect();
    let entries: Vec<TraceabilityEntry> = state.get_as("traceability_entries")?;
    let snippets: Vec<ContextSnippet> = state.get_as("retrieved_context")?;

    let requirements_json = pretty(&requirements)?;
    let traceability_json = pretty(&entries)?;
    let context = truncate_chars(&format_context(&snippets), SPEC_CONTEXT_CHARS);
    let prompt = render(
        prompts::GENERATE_SPEC_PROMPT,
        &[
            ("requirements", requirements_json.as_str()),
            ("traceability", traceability_json.as_str()),
            ("context", context.as_str()),
        ],
    );
    let response = call_model(&deps, TaskType::DocumentGeneration, prompt, None).await?;

    let requirements_spec = json!({
        "title": "Requirements Specification",
        "content": response.text,
        "functional_count": functional.len(),
        "non_functional_count": non_functional.len(),
        "requirements": requirements,
    });
    let traceability_matrix = json!({
        "title": "Requirements Traceability Matrix",
        "entries": entries,
        "total_requirements": requirements.len(),
    });

    let update = StateUpdate::new()
        .set("requirements_spec", requirements_spec)
        .set("traceability_matrix", traceability_matrix);
    Ok(accounted(update, GENERATE_SPEC_DOCUMENT, &response))
}

pub(crate) async fn finalize_deliverables(state: GraphState) -> Result<StateUpdate> {
    info!(
        project_id = state.get_str("project_id").unwrap_or_default(),
        "Analysis deliverables finalized"
    );
    Ok(StateUpdate::new().set(PHASE_STATUS, "completed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ryan::state::Priority;

    fn req(id: &str, category: Category) -> Requirement {
        Requirement {
            id: id.into(),
            title: format!("title {}", id),
            description: "desc".into(),
            category,
            priority: Priority::Medium,
            source_reference: "§1".into(),
            acceptance_criteria: vec!["works".into()],
        }
    }

    #[test]
    fn context_formatting() {
        assert_eq!(format_context(&[]), NO_CONTEXT);
        let out = format_context(&[
            ContextSnippet {
                content: "alpha".into(),
                metadata: json!({"doc_type": "dev_request"}),
                relevance_score: 0.912,
            },
            ContextSnippet {
                content: "beta".into(),
                metadata: Value::Null,
                relevance_score: 0.5,
            },
        ]);
        assert_eq!(
            out,
            "[Context 1 | Source: dev_request | Relevance: 0.91]\nalpha\n\n---\n\n\
             [Context 2 | Source: unknown | Relevance: 0.50]\nbeta"
        );
    }

    #[test]
    fn edits_merge_shallowly_and_keep_order() {
        let reqs = vec![
            req("REQ-001", Category::Functional),
            req("REQ-002", Category::Functional),
            req("REQ-003", Category::NonFunctional),
        ];
        let edits = json!({
            "REQ-002": {"title": "Renamed", "category": "non_functional"},
            "REQ-999": {"title": "ghost"}
        });
        let out = apply_edits(reqs, edits.as_object().unwrap()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].id, "REQ-002");
        assert_eq!(out[1].title, "Renamed");
        assert_eq!(out[1].description, "desc");
        let (f, nf) = partition(out);
        assert_eq!(f.len(), 1);
        assert_eq!(nf.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["REQ-002", "REQ-003"]);
    }

    #[test]
    fn invalid_edit_is_rejected() {
        let edits = json!({"REQ-001": {"priority": "urgent"}});
        let err = apply_edits(vec![req("REQ-001", Category::Functional)], edits.as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, AidenError::InvalidState(_)));
    }

    #[test]
    fn structured_lists_accept_wrapped_or_bare() {
        let wrapped: Vec<TraceabilityEntry> = parse_list(
            json!({"entries": [{"requirement_id": "REQ-001", "requirement_title": "t",
                                "source_section": "1", "source_text": "x", "verification_method": "test"}]}),
            "entries",
        )
        .unwrap();
        assert_eq!(wrapped.len(), 1);
        let bare: Vec<TraceabilityEntry> = parse_list(json!([]), "entries").unwrap();
        assert!(bare.is_empty());
        assert!(parse_list::<TraceabilityEntry>(json!("nope"), "entries").is_err());
    }

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_chars("요구사항명세서", 3), "요구사");
    }
}
