//! Project pipeline orchestration: phase ordering, human review points and
//! the engine that moves projects from one phase to the next.

mod deliverables;
pub mod engine;
pub mod event_log;
pub mod hitl;
pub mod phase;

pub use engine::{ExecutionView, OrchestrationEngine, ProjectOverview};
pub use event_log::EventLogger;
pub use hitl::HitlController;
pub use phase::{PhaseController, PhasePlan};
