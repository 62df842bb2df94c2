use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use aiden_core::config::HitlConfig;
use aiden_core::error::{AidenError, Result};
use aiden_core::event::{types, Event, EventSink};
use aiden_core::types::{
    new_id, Decision, HitlReview, PhaseStatus, ResumePayload, ReviewDecision, ReviewStatus,
};
use aiden_store::Store;

/// Creates and resolves human review points.
///
/// Review rows and the owning phase's status are written in one unit of
/// work. Events go out only after the commit.
pub struct HitlController {
    store: Arc<Store>,
    events: Arc<dyn EventSink>,
    deadline: Option<Duration>,
}

impl HitlController {
    pub fn new(store: Arc<Store>, events: Arc<dyn EventSink>, config: &HitlConfig) -> Self {
        Self {
            store,
            events,
            deadline: config
                .review_deadline_hours
                .map(|h| Duration::hours(h as i64)),
        }
    }

    /// Persist a pending review for an execution and move its phase to
    /// `hitl_review`. Returns the review id.
    pub fn create_interrupt(
        &self,
        execution_id: &str,
        project_id: &str,
        review_type: &str,
        content_snapshot: Value,
        interrupt_id: Option<&str>,
    ) -> Result<String> {
        let now = Utc::now();
        let summary = snapshot_summary(review_type, &content_snapshot);
        let review = HitlReview {
            id: new_id(),
            execution_id: Some(execution_id.to_string()),
            review_type: review_type.to_string(),
            status: ReviewStatus::Pending,
            content_snapshot,
            interrupt_id: interrupt_id.map(str::to_string),
            reviewer: None,
            assigned_at: None,
            decided_at: None,
            deadline_at: self.deadline.map(|d| now + d),
            created_at: now,
        };

        let agent_name = self.store.unit_of_work(|uow| {
            let execution = uow.get_execution(execution_id)?;
            let mut phase = uow.get_phase(&execution.phase_id)?;
            uow.insert_review(&review)?;
            phase.status = PhaseStatus::HitlReview;
            uow.update_phase(&phase)?;
            Ok(execution.agent_name)
        })?;

        info!(
            review_id = %review.id,
            review_type,
            execution_id,
            "HITL review requested"
        );
        self.events.publish_event(
            Event::new(
                types::HITL_REQUESTED,
                project_id,
                json!({
                    "review_id": review.id,
                    "review_type": review_type,
                    "content_snapshot_summary": summary,
                }),
            )
            .with_execution(execution_id)
            .with_agent(agent_name),
        );
        Ok(review.id)
    }

    /// Record a human decision and produce the payload for resuming the
    /// paused execution.
    pub fn resolve_interrupt(
        &self,
        review_id: &str,
        decision: Decision,
        feedback: Option<String>,
        edits: Option<Value>,
        decided_by: Option<String>,
    ) -> Result<ResumePayload> {
        let now = Utc::now();
        let record = ReviewDecision {
            id: new_id(),
            review_id: review_id.to_string(),
            decision,
            feedback: feedback.clone(),
            edits: edits.clone(),
            decided_by: decided_by.clone(),
            created_at: now,
        };

        let owner = self.store.unit_of_work(|uow| {
            let mut review = uow.get_review(review_id)?;
            if review.status.is_terminal() {
                return Err(AidenError::InvalidState(format!(
                    "review {} is already {}",
                    review_id, review.status
                )));
            }
            uow.insert_decision(&record)?;
            review.status = decision.into();
            review.decided_at = Some(now);
            if review.reviewer.is_none() {
                review.reviewer = decided_by.clone();
            }
            uow.update_review(&review)?;

            let Some(execution_id) = review.execution_id.as_deref() else {
                return Ok(None);
            };
            let execution = uow.get_execution(execution_id)?;
            let mut phase = uow.get_phase(&execution.phase_id)?;
            if phase.status == PhaseStatus::HitlReview
                && uow.count_open_reviews_for_phase(&phase.id)? == 0
            {
                phase.status = PhaseStatus::InProgress;
                uow.update_phase(&phase)?;
            }
            Ok(Some((phase.project_id, execution)))
        })?;

        info!(review_id, decision = %decision, "HITL review resolved");
        match owner {
            Some((project_id, execution)) => self.events.publish_event(
                Event::new(
                    types::HITL_RESOLVED,
                    &project_id,
                    json!({ "review_id": review_id, "decision": decision }),
                )
                .with_execution(execution.id)
                .with_agent(execution.agent_name),
            ),
            None => debug!(review_id, "Review has no execution, no event published"),
        }

        Ok(ResumePayload {
            decision,
            feedback,
            edits,
            decided_by,
            resolved_at: now,
        })
    }

    /// Rebuild the resume payload from a decided review's latest decision.
    pub fn decision_payload(&self, review_id: &str) -> Result<ResumePayload> {
        let decisions = self
            .store
            .unit_of_work(|uow| uow.list_decisions(review_id))?;
        let Some(last) = decisions.into_iter().last() else {
            return Err(AidenError::InvalidState(format!(
                "review {} has no recorded decision",
                review_id
            )));
        };
        Ok(ResumePayload {
            decision: last.decision,
            feedback: last.feedback,
            edits: last.edits,
            decided_by: last.decided_by,
            resolved_at: last.created_at,
        })
    }

    /// Assign a pending review to a reviewer.
    pub fn claim_review(&self, review_id: &str, reviewer: &str) -> Result<HitlReview> {
        self.store.unit_of_work(|uow| {
            let mut review = uow.get_review(review_id)?;
            if review.status != ReviewStatus::Pending {
                return Err(AidenError::InvalidState(format!(
                    "review {} is {}, only pending reviews can be claimed",
                    review_id, review.status
                )));
            }
            review.status = ReviewStatus::InReview;
            review.reviewer = Some(reviewer.to_string());
            review.assigned_at = Some(Utc::now());
            uow.update_review(&review)?;
            Ok(review)
        })
    }

    pub fn get_review(&self, review_id: &str) -> Result<HitlReview> {
        self.store.unit_of_work(|uow| uow.get_review(review_id))
    }

    /// Pending and in-review reviews across all projects.
    pub fn list_pending(&self) -> Result<Vec<HitlReview>> {
        self.store.unit_of_work(|uow| uow.list_open_reviews())
    }

    /// Open reviews past their deadline. Acting on them is up to the caller.
    pub fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<HitlReview>> {
        self.store.unit_of_work(|uow| uow.list_overdue_reviews(now))
    }
}

fn snapshot_summary(review_type: &str, snapshot: &Value) -> String {
    let message = snapshot
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    format!("[{}] {}", review_type, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiden_core::types::{
        AgentExecution, ExecutionStatus, Phase, PhaseType, Project, ProjectStatus,
    };
    use aiden_test_utils::RecordingSink;

    struct Fixture {
        store: Arc<Store>,
        sink: Arc<RecordingSink>,
        hitl: HitlController,
        project: Project,
        phase: Phase,
        execution: AgentExecution,
    }

    fn fixture(deadline_hours: Option<u64>) -> Fixture {
        let store = Arc::new(Store::in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new());
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            name: "Portal".into(),
            description: None,
            status: ProjectStatus::Analysis,
            current_phase: Some(PhaseType::Analysis),
            config: json!({}),
            created_at: now,
            updated_at: now,
        };
        let phase = Phase {
            id: new_id(),
            project_id: project.id.clone(),
            phase_type: PhaseType::Analysis,
            phase_order: 1,
            status: PhaseStatus::InProgress,
            agent_name: Some("ryan".into()),
            started_at: Some(now),
            completed_at: None,
        };
        let execution = AgentExecution {
            id: new_id(),
            phase_id: phase.id.clone(),
            agent_name: "ryan".into(),
            thread_id: format!("{}:analysis:0badcafe", project.id),
            status: ExecutionStatus::Running,
            total_tokens: 0,
            total_cost: 0.0,
            started_at: Some(now),
            completed_at: None,
            error_message: None,
        };
        store
            .unit_of_work(|uow| {
                uow.insert_project(&project)?;
                uow.insert_phase(&phase)?;
                uow.insert_execution(&execution)
            })
            .unwrap();
        let hitl = HitlController::new(
            store.clone(),
            sink.clone(),
            &HitlConfig {
                review_deadline_hours: deadline_hours,
            },
        );
        Fixture {
            store,
            sink,
            hitl,
            project,
            phase,
            execution,
        }
    }

    fn snapshot() -> Value {
        json!({
            "review_type": "ambiguity_review",
            "message": "2 ambiguities detected in requirements. Please review.",
            "requirements": [{"id": "REQ-001"}],
        })
    }

    fn phase_status(f: &Fixture) -> PhaseStatus {
        f.store
            .unit_of_work(|uow| uow.get_phase(&f.phase.id))
            .unwrap()
            .status
    }

    #[test]
    fn interrupt_creates_pending_review_and_pauses_phase() {
        let f = fixture(None);
        let review_id = f
            .hitl
            .create_interrupt(
                &f.execution.id,
                &f.project.id,
                "ambiguity_review",
                snapshot(),
                Some("thread#4"),
            )
            .unwrap();

        let review = f.hitl.get_review(&review_id).unwrap();
        assert_eq!(review.status, ReviewStatus::Pending);
        assert_eq!(review.interrupt_id.as_deref(), Some("thread#4"));
        assert_eq!(review.content_snapshot, snapshot());
        assert!(review.deadline_at.is_none());
        assert_eq!(phase_status(&f), PhaseStatus::HitlReview);

        let events = f.sink.of_type(types::HITL_REQUESTED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["review_id"], review_id.as_str());
        assert_eq!(
            events[0].data["content_snapshot_summary"],
            "[ambiguity_review] 2 ambiguities detected in requirements. Please review."
        );
        assert!(events[0].data.get("content_snapshot").is_none());
        assert_eq!(events[0].agent_name.as_deref(), Some("ryan"));
    }

    #[test]
    fn two_interrupts_make_two_reviews() {
        let f = fixture(None);
        let a = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "ambiguity_review", snapshot(), None)
            .unwrap();
        let b = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "ambiguity_review", snapshot(), None)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(f.hitl.list_pending().unwrap().len(), 2);
    }

    #[test]
    fn resolve_returns_payload_and_restores_phase() {
        let f = fixture(None);
        let review_id = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "final_deliverable_review", snapshot(), None)
            .unwrap();

        let payload = f
            .hitl
            .resolve_interrupt(
                &review_id,
                Decision::RevisionRequested,
                Some("add security requirements".into()),
                None,
                Some("lead@example.com".into()),
            )
            .unwrap();
        assert_eq!(payload.decision, Decision::RevisionRequested);
        assert_eq!(payload.feedback.as_deref(), Some("add security requirements"));

        let review = f.hitl.get_review(&review_id).unwrap();
        assert_eq!(review.status, ReviewStatus::RevisionRequested);
        assert!(review.decided_at.is_some());
        assert_eq!(review.reviewer.as_deref(), Some("lead@example.com"));
        assert_eq!(phase_status(&f), PhaseStatus::InProgress);

        let decisions = f
            .store
            .unit_of_work(|uow| uow.list_decisions(&review_id))
            .unwrap();
        assert_eq!(decisions.len(), 1);

        let resolved = f.sink.of_type(types::HITL_RESOLVED);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].data["decision"], "revision_requested");
    }

    #[test]
    fn phase_stays_in_review_while_another_review_is_open() {
        let f = fixture(None);
        let first = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "ambiguity_review", snapshot(), None)
            .unwrap();
        f.hitl
            .create_interrupt(&f.execution.id, &f.project.id, "ambiguity_review", snapshot(), None)
            .unwrap();
        f.hitl
            .resolve_interrupt(&first, Decision::Approved, None, None, None)
            .unwrap();
        assert_eq!(phase_status(&f), PhaseStatus::HitlReview);
    }

    #[test]
    fn resolving_twice_is_invalid() {
        let f = fixture(None);
        let review_id = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "ambiguity_review", snapshot(), None)
            .unwrap();
        f.hitl
            .resolve_interrupt(&review_id, Decision::Approved, None, None, None)
            .unwrap();
        let err = f
            .hitl
            .resolve_interrupt(&review_id, Decision::Rejected, None, None, None)
            .unwrap_err();
        assert!(matches!(err, AidenError::InvalidState(_)));
        assert_eq!(
            f.store
                .unit_of_work(|uow| uow.list_decisions(&review_id))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn decision_payload_matches_what_resolve_returned() {
        let f = fixture(None);
        let review_id = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "final_deliverable_review", snapshot(), None)
            .unwrap();
        let err = f.hitl.decision_payload(&review_id).unwrap_err();
        assert!(matches!(err, AidenError::InvalidState(_)));

        let edits = json!({"REQ-001": {"priority": "low"}});
        let resolved = f
            .hitl
            .resolve_interrupt(
                &review_id,
                Decision::RevisionRequested,
                Some("lower it".into()),
                Some(edits.clone()),
                Some("pat".into()),
            )
            .unwrap();
        let rebuilt = f.hitl.decision_payload(&review_id).unwrap();
        assert_eq!(rebuilt.decision, resolved.decision);
        assert_eq!(rebuilt.feedback, resolved.feedback);
        assert_eq!(rebuilt.edits, Some(edits));
        assert_eq!(rebuilt.decided_by.as_deref(), Some("pat"));
        assert_eq!(rebuilt.resolved_at.timestamp(), resolved.resolved_at.timestamp());
    }

    #[test]
    fn unknown_review_is_not_found() {
        let f = fixture(None);
        let err = f
            .hitl
            .resolve_interrupt("missing", Decision::Approved, None, None, None)
            .unwrap_err();
        assert!(matches!(err, AidenError::NotFound { .. }));
    }

    #[test]
    fn claim_moves_pending_to_in_review() {
        let f = fixture(None);
        let review_id = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "ambiguity_review", snapshot(), None)
            .unwrap();
        let review = f.hitl.claim_review(&review_id, "ana").unwrap();
        assert_eq!(review.status, ReviewStatus::InReview);
        assert_eq!(review.reviewer.as_deref(), Some("ana"));
        assert!(review.assigned_at.is_some());

        assert!(f.hitl.claim_review(&review_id, "bob").is_err());
        // Claimed reviews still count as open.
        assert_eq!(f.hitl.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn overdue_uses_configured_deadline() {
        let f = fixture(Some(2));
        let review_id = f
            .hitl
            .create_interrupt(&f.execution.id, &f.project.id, "ambiguity_review", snapshot(), None)
            .unwrap();
        let review = f.hitl.get_review(&review_id).unwrap();
        assert!(review.deadline_at.is_some());

        assert!(f.hitl.list_overdue(Utc::now()).unwrap().is_empty());
        let later = Utc::now() + Duration::hours(3);
        let overdue = f.hitl.list_overdue(later).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, review_id);
    }
}
