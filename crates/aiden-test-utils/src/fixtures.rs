use std::path::Path;

use serde_json::{json, Value};

use aiden_core::config::AppConfig;
use aiden_core::types::TaskType;

use crate::model::{ScriptedModel, ScriptedProvider};
use crate::retriever::StaticRetriever;

pub const SPEC_MARKDOWN: &str = "# Requirements Specification\n\n## Functional Requirements\n\n- REQ-001 User login\n";

/// One functional and one non-functional requirement.
pub fn sample_requirements() -> Value {
    json!({
        "requirements": [
            {
                "id": "REQ-001",
                "title": "User login",
                "description": "Users sign in with email and password.",
                "category": "functional",
                "priority": "high",
                "source_reference": "Section 2.1",
                "acceptance_criteria": ["Valid credentials open the dashboard"]
            },
            {
                "id": "REQ-002",
                "title": "Response time",
                "description": "Pages render quickly.",
                "category": "non_functional",
                "priority": "medium",
                "source_reference": "Section 3",
                "acceptance_criteria": ["p95 under 2 seconds"]
            }
        ]
    })
}

pub fn sample_ambiguities() -> Value {
    json!({
        "ambiguities": [
            {
                "requirement_id": "REQ-002",
                "description": "\"Quickly\" is not measurable.",
                "suggestion": "State a latency target.",
                "severity": "medium"
            }
        ]
    })
}

pub fn no_ambiguities() -> Value {
    json!({ "ambiguities": [] })
}

pub fn sample_traceability() -> Value {
    json!({
        "entries": [
            {
                "requirement_id": "REQ-001",
                "requirement_title": "User login",
                "source_section": "2.1",
                "source_text": "Users must be able to log in.",
                "verification_method": "test"
            },
            {
                "requirement_id": "REQ-002",
                "requirement_title": "Response time",
                "source_section": "3",
                "source_text": "The system should be fast.",
                "verification_method": "demonstration"
            }
        ]
    })
}

/// Models for a full analysis run. Each scripted call costs 100 tokens.
pub fn analysis_provider(ambiguities: Value) -> ScriptedProvider {
    ScriptedProvider::new()
        .with(
            TaskType::RequirementExtraction,
            ScriptedModel::new("extractor").reply_json(sample_requirements(), 100),
        )
        .with(
            TaskType::AmbiguityDetection,
            ScriptedModel::new("detector").reply_json(ambiguities, 100),
        )
        .with(
            TaskType::TraceabilityMapping,
            ScriptedModel::new("tracer").reply_json(sample_traceability(), 100),
        )
        .with(
            TaskType::DocumentGeneration,
            ScriptedModel::new("writer").reply_text(SPEC_MARKDOWN, 100),
        )
}

/// A retriever holding one indexed development request.
pub fn dev_request_retriever(document_id: &str) -> StaticRetriever {
    StaticRetriever::new()
        .with_document(
            document_id,
            &["# Shop portal", "Users must be able to log in.", "The system should be fast."],
        )
        .with_context("Users must be able to log in.", 0.9)
        .with_context("The system should be fast.", 0.7)
}

/// Config with storage under `dir` and the analysis phase assigned to ryan.
pub fn test_config(dir: &Path, max_revisions: Option<u32>) -> AppConfig {
    let limit = max_revisions
        .map(|l| format!("max_revisions = {}\n", l))
        .unwrap_or_default();
    let toml = format!(
        r#"
[storage]
database = '{db}'
checkpoints = '{cp}'

[pipeline]
{limit}
[pipeline.agents]
analysis = "ryan"
"#,
        db = dir.join("aiden.db").display(),
        cp = dir.join("checkpoints.db").display(),
        limit = limit,
    );
    match AppConfig::parse(&toml) {
        Ok(config) => config,
        Err(e) => panic!("fixture config must parse: {}", e),
    }
}

pub fn temp_dir() -> tempfile::TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("failed to create temp dir: {}", e),
    }
}
