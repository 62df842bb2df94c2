use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::graph::StateSchema;

/// Empty `dev_request_doc_id`: the project has no development request yet.
pub const NO_DOCUMENT: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Functional,
    NonFunctional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A requirement extracted from the development request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    #[serde(default)]
    pub source_reference: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambiguity {
    pub requirement_id: String,
    pub description: String,
    pub suggestion: String,
    pub severity: Priority,
}

/// Maps a requirement back to where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceabilityEntry {
    pub requirement_id: String,
    pub requirement_title: String,
    pub source_section: String,
    pub source_text: String,
    pub verification_method: String,
}

/// Working state of the analysis agent.
pub fn ryan_schema() -> StateSchema {
    StateSchema::new()
        // input
        .overwrite("project_id", Value::Null)
        .overwrite("phase_id", Value::Null)
        .overwrite("execution_id", Value::Null)
        .overwrite("dev_request_doc_id", json!(NO_DOCUMENT))
        .append("messages")
        // working data
        .overwrite("document_content", json!(""))
        .overwrite("retrieved_context", json!([]))
        .overwrite("raw_requirements", json!([]))
        .overwrite("functional_requirements", json!([]))
        .overwrite("non_functional_requirements", json!([]))
        .overwrite("ambiguities", json!([]))
        .overwrite("traceability_entries", json!([]))
        // review
        .overwrite("hitl_status", Value::Null)
        .overwrite("hitl_feedback", Value::Null)
        .sum("revision_count")
        // deliverables
        .overwrite("requirements_spec", Value::Null)
        .overwrite("traceability_matrix", Value::Null)
        // accounting
        .sum("total_tokens")
        .sum("total_cost")
}
