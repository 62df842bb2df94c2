use thiserror::Error;

#[derive(Debug, Error)]
pub enum AidenError {
    // Lookup / validation errors
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Pipeline errors
    #[error("Phase '{phase_type}' has no agent assigned yet")]
    PhaseNotReady { phase_type: String },

    #[error("Agent '{agent}' failed: {message}")]
    AgentExecution { agent: String, message: String },

    #[error("No branch of router on node '{node}' matches state discriminant '{discriminant}'")]
    Routing { node: String, discriminant: String },

    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("HITL review timed out: {review_id}")]
    HitlTimeout { review_id: String },

    #[error("Revision limit of {limit} exceeded")]
    RevisionLimitExceeded { limit: u32 },

    #[error("Thread id collision: {0}")]
    ThreadIdCollision(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // Collaborator errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AidenError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Stable machine-readable code, suitable for mapping onto API status classes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::PhaseNotReady { .. } => "PHASE_NOT_READY",
            Self::AgentExecution { .. } => "AGENT_EXECUTION_FAILED",
            Self::Routing { .. } => "ROUTING_ERROR",
            Self::NodeFailed { .. } => "NODE_FAILED",
            Self::HitlTimeout { .. } => "HITL_TIMEOUT",
            Self::RevisionLimitExceeded { .. } => "REVISION_LIMIT_EXCEEDED",
            Self::ThreadIdCollision(_) => "THREAD_ID_COLLISION",
            Self::InvalidGraph(_) => "INVALID_GRAPH",
            Self::Config(_) | Self::ConfigNotFound(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Checkpoint(_) => "CHECKPOINT_ERROR",
            Self::LlmRequest(_) | Self::LlmParse(_) => "LLM_PROVIDER_ERROR",
            Self::Retrieval(_) => "RAG_PIPELINE_ERROR",
            Self::Io(_) | Self::Json(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors the caller caused (bad id, illegal transition) rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InvalidTransition(_)
                | Self::InvalidState(_)
                | Self::PhaseNotReady { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AidenError>;
