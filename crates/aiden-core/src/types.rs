use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AidenError;

/// Generate a fresh entity id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Declares a snake_case string enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = AidenError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(AidenError::InvalidState(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Pipeline phase types, declared in traversal order.
    pub enum PhaseType {
        Analysis => "analysis",
        Design => "design",
        Development => "development",
        Testing => "testing",
    }
}

impl PhaseType {
    /// The fixed phase order of every project.
    pub const ORDER: [PhaseType; 4] = [
        PhaseType::Analysis,
        PhaseType::Design,
        PhaseType::Development,
        PhaseType::Testing,
    ];
}

string_enum! {
    pub enum ProjectStatus {
        Created => "created",
        Analysis => "analysis",
        Design => "design",
        Development => "development",
        Testing => "testing",
        Completed => "completed",
        Archived => "archived",
        Paused => "paused",
    }
}

impl ProjectStatus {
    /// True while the project is working through one of its phases.
    pub fn is_active_phase(&self) -> bool {
        matches!(
            self,
            Self::Analysis | Self::Design | Self::Development | Self::Testing
        )
    }
}

impl From<PhaseType> for ProjectStatus {
    fn from(phase: PhaseType) -> Self {
        match phase {
            PhaseType::Analysis => Self::Analysis,
            PhaseType::Design => Self::Design,
            PhaseType::Development => Self::Development,
            PhaseType::Testing => Self::Testing,
        }
    }
}

string_enum! {
    pub enum PhaseStatus {
        Pending => "pending",
        Ready => "ready",
        InProgress => "in_progress",
        HitlReview => "hitl_review",
        Completed => "completed",
        Failed => "failed",
    }
}

string_enum! {
    pub enum ExecutionStatus {
        Initialized => "initialized",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

string_enum! {
    pub enum ReviewStatus {
        Pending => "pending",
        InReview => "in_review",
        Approved => "approved",
        Rejected => "rejected",
        RevisionRequested => "revision_requested",
    }
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::RevisionRequested
        )
    }
}

string_enum! {
    /// A human decision on a HITL review.
    pub enum Decision {
        Approved => "approved",
        Rejected => "rejected",
        RevisionRequested => "revision_requested",
    }
}

impl From<Decision> for ReviewStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => Self::Approved,
            Decision::Rejected => Self::Rejected,
            Decision::RevisionRequested => Self::RevisionRequested,
        }
    }
}

string_enum! {
    pub enum DeliverableStatus {
        Draft => "draft",
        Approved => "approved",
    }
}

string_enum! {
    pub enum DeliverableFormat {
        Markdown => "markdown",
        Json => "json",
    }
}

string_enum! {
    /// Kinds of model work, used to pick a model per task.
    pub enum TaskType {
        RequirementExtraction => "requirement_extraction",
        RequirementClassification => "requirement_classification",
        AmbiguityDetection => "ambiguity_detection",
        DocumentGeneration => "document_generation",
        TraceabilityMapping => "traceability_mapping",
        CodeGeneration => "code_generation",
        CodeReview => "code_review",
        TestGeneration => "test_generation",
        Summarization => "summarization",
    }
}

/// A software project moving through the phase pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub current_phase: Option<PhaseType>,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stage of a project's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub project_id: String,
    pub phase_type: PhaseType,
    pub phase_order: u32,
    pub status: PhaseStatus,
    pub agent_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One run (or resumed run) of a phase's state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: String,
    pub phase_id: String,
    pub agent_name: String,
    /// Durable correlation key shared by every checkpoint of this run.
    pub thread_id: String,
    pub status: ExecutionStatus,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A persisted request for a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlReview {
    pub id: String,
    pub execution_id: Option<String>,
    pub review_type: String,
    pub status: ReviewStatus,
    /// Exactly what was shown to the reviewer.
    pub content_snapshot: serde_json::Value,
    pub interrupt_id: Option<String>,
    pub reviewer: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Append-only decision log entry for a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub id: String,
    pub review_id: String,
    pub decision: Decision,
    pub feedback: Option<String>,
    pub edits: Option<serde_json::Value>,
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: String,
    pub phase_id: String,
    pub title: String,
    pub deliverable_type: String,
    pub status: DeliverableStatus,
    pub current_version: u32,
    pub format: DeliverableFormat,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot of a deliverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverableVersion {
    pub id: String,
    pub deliverable_id: String,
    pub version_number: u32,
    pub content: String,
    pub content_structured: Option<serde_json::Value>,
    pub change_summary: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// An uploaded source document (e.g. the development request).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub doc_type: String,
    pub filename: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A retrieved piece of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub relevance_score: f64,
}

/// Optional narrowing of a retrieval query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilter {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
}

/// What a human decided, fed verbatim into a paused state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub decision: Decision,
    pub feedback: Option<String>,
    pub edits: Option<serde_json::Value>,
    pub decided_by: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Emitted by a state machine when it pauses before an interrupt node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequest {
    /// Node that will run once the machine is resumed.
    pub node: String,
    pub review_type: String,
    pub message: String,
    /// Review material (requirements, ambiguities, drafts).
    pub content: serde_json::Value,
}

impl InterruptRequest {
    /// The payload stored on the review: content plus review type and message.
    pub fn content_snapshot(&self) -> serde_json::Value {
        let mut snapshot = match &self.content {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("content".into(), other.clone());
                map
            }
        };
        snapshot.insert(
            "review_type".into(),
            serde_json::Value::String(self.review_type.clone()),
        );
        snapshot.insert(
            "message".into(),
            serde_json::Value::String(self.message.clone()),
        );
        serde_json::Value::Object(snapshot)
    }
}

/// Token accounting for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

fn thread_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?P<project>[^:]+):(?P<phase>[a-z_]+):(?P<suffix>[0-9a-f]{8})$").ok()
        })
        .as_ref()
}

/// Mint a thread id of the form `{project_id}:{phase_type}:{8 hex chars}`.
pub fn new_thread_id(project_id: &str, phase_type: PhaseType) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}:{}:{}", project_id, phase_type, &suffix[..8])
}

/// Split a thread id into its project id and phase type.
pub fn parse_thread_id(thread_id: &str) -> Option<(String, PhaseType)> {
    let caps = thread_id_pattern()?.captures(thread_id)?;
    let phase = caps["phase"].parse().ok()?;
    Some((caps["project"].to_string(), phase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_type_round_trips_through_str() {
        for phase in PhaseType::ORDER {
            let parsed: PhaseType = phase.as_str().parse().unwrap();
            assert_eq!(parsed, phase);
        }
        assert!("deployment".parse::<PhaseType>().is_err());
    }

    #[test]
    fn decision_maps_to_terminal_review_status() {
        for decision in [
            Decision::Approved,
            Decision::Rejected,
            Decision::RevisionRequested,
        ] {
            assert!(ReviewStatus::from(decision).is_terminal());
        }
        assert!(!ReviewStatus::Pending.is_terminal());
        assert!(!ReviewStatus::InReview.is_terminal());
    }

    #[test]
    fn decision_serializes_snake_case() {
        let json = serde_json::to_value(Decision::RevisionRequested).unwrap();
        assert_eq!(json, serde_json::json!("revision_requested"));
    }

    #[test]
    fn thread_id_shape() {
        let tid = new_thread_id("proj-1", PhaseType::Analysis);
        assert!(tid.starts_with("proj-1:analysis:"));
        let (project, phase) = parse_thread_id(&tid).unwrap();
        assert_eq!(project, "proj-1");
        assert_eq!(phase, PhaseType::Analysis);
        assert_ne!(tid, new_thread_id("proj-1", PhaseType::Analysis));
    }

    #[test]
    fn parse_rejects_malformed_thread_id() {
        assert!(parse_thread_id("no-colons").is_none());
        assert!(parse_thread_id("p:unknown_phase:0123abcd").is_none());
        assert!(parse_thread_id("p:analysis:XYZ").is_none());
    }

    #[test]
    fn content_snapshot_includes_review_metadata() {
        let req = InterruptRequest {
            node: "hitl_final_review".into(),
            review_type: "final_deliverable_review".into(),
            message: "ready".into(),
            content: serde_json::json!({"requirements_spec": {"title": "x"}}),
        };
        let snap = req.content_snapshot();
        assert_eq!(snap["review_type"], "final_deliverable_review");
        assert_eq!(snap["message"], "ready");
        assert_eq!(snap["requirements_spec"]["title"], "x");
    }
}
