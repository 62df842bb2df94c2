mod deliverables;
mod documents;
mod executions;
pub mod index;
mod projects;
mod reviews;
mod schema;
mod store;

pub use index::{chunk_text, DocumentIndex};
pub use store::{Store, UnitOfWork};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use aiden_core::types::*;

    use crate::Store;

    pub fn seed_project(store: &Store) -> (Project, Vec<Phase>) {
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            name: "Billing".into(),
            description: Some("Invoices".into()),
            status: ProjectStatus::Created,
            current_phase: None,
            config: serde_json::json!({"team": "core"}),
            created_at: now,
            updated_at: now,
        };
        let phases: Vec<Phase> = PhaseType::ORDER
            .iter()
            .enumerate()
            .map(|(i, pt)| Phase {
                id: new_id(),
                project_id: project.id.clone(),
                phase_type: *pt,
                phase_order: i as u32 + 1,
                status: PhaseStatus::Pending,
                agent_name: (*pt == PhaseType::Analysis).then(|| "ryan".to_string()),
                started_at: None,
                completed_at: None,
            })
            .collect();
        store
            .unit_of_work(|uow| {
                uow.insert_project(&project)?;
                for phase in &phases {
                    uow.insert_phase(phase)?;
                }
                Ok(())
            })
            .unwrap();
        (project, phases)
    }

    pub fn execution_for(phase: &Phase, thread_id: &str) -> AgentExecution {
        AgentExecution {
            id: new_id(),
            phase_id: phase.id.clone(),
            agent_name: "ryan".into(),
            thread_id: thread_id.into(),
            status: ExecutionStatus::Running,
            total_tokens: 0,
            total_cost: 0.0,
            started_at: Some(Utc::now()),
            completed_at: None,
            error_message: None,
        }
    }

    pub fn review_for(execution_id: &str) -> HitlReview {
        HitlReview {
            id: new_id(),
            execution_id: Some(execution_id.into()),
            review_type: "ambiguity_review".into(),
            status: ReviewStatus::Pending,
            content_snapshot: serde_json::json!({"message": "check"}),
            interrupt_id: None,
            reviewer: None,
            assigned_at: None,
            decided_at: None,
            deadline_at: None,
            created_at: Utc::now(),
        }
    }
}
