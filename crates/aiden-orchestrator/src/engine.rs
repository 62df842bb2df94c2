use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use aiden_agent::ryan::state::NO_DOCUMENT;
use aiden_agent::graph::state::ERROR;
use aiden_agent::{Agent, AgentRegistry, Checkpoint, GraphState, RunOutcome, RunStatus};
use aiden_core::config::AppConfig;
use aiden_core::error::{AidenError, Result};
use aiden_core::event::{types, Event, EventSink};
use aiden_core::types::{
    new_id, new_thread_id, AgentExecution, Decision, Deliverable, DeliverableStatus,
    DeliverableVersion, Document, ExecutionStatus, HitlReview, Phase, PhaseStatus, PhaseType,
    Project, ProjectStatus,
};
use aiden_store::{chunk_text, Store, UnitOfWork};

use crate::deliverables;
use crate::hitl::HitlController;
use crate::phase::PhaseController;

/// A project with its phases and deliverables.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOverview {
    pub project: Project,
    pub phases: Vec<Phase>,
    pub deliverables: Vec<Deliverable>,
}

/// An execution row next to the checkpoint its agent last wrote.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionView {
    pub execution: AgentExecution,
    pub checkpoint: Option<Checkpoint>,
}

/// Drives projects through their phases.
///
/// Each step commits its database writes in one unit of work before
/// publishing events. Calls into an agent for a given thread are serialized
/// by a per-thread async mutex.
pub struct OrchestrationEngine {
    store: Arc<Store>,
    agents: AgentRegistry,
    phases: PhaseController,
    hitl: HitlController,
    events: Arc<dyn EventSink>,
    dev_request_doc_type: String,
    chunk_size: usize,
    thread_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OrchestrationEngine {
    pub fn new(
        store: Arc<Store>,
        agents: AgentRegistry,
        events: Arc<dyn EventSink>,
        config: &AppConfig,
    ) -> Result<Self> {
        let phases = PhaseController::from_config(config)?;
        for plan in phases.all_phases() {
            if let Some(agent) = plan.agent_name.as_deref() {
                if !agents.contains(agent) {
                    warn!(phase = %plan.phase_type, agent, "Phase assigned to an unregistered agent");
                }
            }
        }
        let hitl = HitlController::new(store.clone(), events.clone(), &config.hitl);
        Ok(Self {
            store,
            agents,
            phases,
            hitl,
            events,
            dev_request_doc_type: config.pipeline.dev_request_doc_type.clone(),
            chunk_size: config.retrieval.chunk_size,
            thread_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn phases(&self) -> &PhaseController {
        &self.phases
    }

    pub fn hitl(&self) -> &HitlController {
        &self.hitl
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // --- Projects ---

    /// Create a project and one pending phase per phase type.
    pub fn create_project(
        &self,
        name: &str,
        description: Option<String>,
        config: Value,
    ) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(AidenError::InvalidState("project name must not be empty".into()));
        }
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            name: name.to_string(),
            description,
            status: ProjectStatus::Created,
            current_phase: None,
            config,
            created_at: now,
            updated_at: now,
        };
        self.store.unit_of_work(|uow| {
            uow.insert_project(&project)?;
            for plan in self.phases.all_phases() {
                uow.insert_phase(&Phase {
                    id: new_id(),
                    project_id: project.id.clone(),
                    phase_type: plan.phase_type,
                    phase_order: plan.phase_order,
                    status: PhaseStatus::Pending,
                    agent_name: plan.agent_name,
                    started_at: None,
                    completed_at: None,
                })?;
            }
            Ok(())
        })?;
        info!(project_id = %project.id, name, "Project created");
        Ok(project)
    }

    /// Start a created project, or pick a paused one back up.
    pub async fn start_project(&self, project_id: &str) -> Result<()> {
        let (phase, live) = self.store.unit_of_work(|uow| {
            let project = uow.get_project(project_id)?;
            let target = match project.status {
                ProjectStatus::Created => self.phases.first_phase(),
                ProjectStatus::Paused => project
                    .current_phase
                    .unwrap_or_else(|| self.phases.first_phase()),
                other => {
                    return Err(AidenError::InvalidTransition(format!(
                        "project {} is {}, only created or paused projects can be started",
                        project_id, other
                    )))
                }
            };
            let mut phase = find_phase(uow, project_id, target)?;
            if phase.status == PhaseStatus::Completed {
                let next = self.phases.get_next_phase(target).ok_or_else(|| {
                    AidenError::InvalidTransition(format!(
                        "project {} has no phase left to run",
                        project_id
                    ))
                })?;
                phase = find_phase(uow, project_id, next)?;
            }
            if !self.phases.is_phase_ready(phase.phase_type) {
                return Err(not_ready(phase.phase_type));
            }
            let live = live_execution(uow, &phase.id)?;
            uow.update_project_status(
                project_id,
                phase.phase_type.into(),
                Some(phase.phase_type),
            )?;
            Ok((phase, live))
        })?;

        info!(project_id, phase = %phase.phase_type, "Project started");
        self.events
            .publish(types::PROJECT_STARTED, json!({}), project_id);

        if let Some(execution) = live {
            // An open review or the running agent carries the phase on.
            debug!(
                project_id,
                phase_id = %phase.id,
                phase_status = %phase.status,
                execution_id = %execution.id,
                "Phase already has a live execution, not restarting it"
            );
            return Ok(());
        }
        self.start_phase(project_id, &phase.id).await
    }

    /// Pause an active project. Running work finishes its current step but
    /// the next phase is not dispatched.
    pub fn pause_project(&self, project_id: &str) -> Result<Project> {
        let project = self.store.unit_of_work(|uow| {
            let project = uow.get_project(project_id)?;
            if !project.status.is_active_phase() {
                return Err(AidenError::InvalidTransition(format!(
                    "project {} is {}, only active projects can be paused",
                    project_id, project.status
                )));
            }
            uow.update_project_status(project_id, ProjectStatus::Paused, project.current_phase)?;
            uow.get_project(project_id)
        })?;
        info!(project_id, "Project paused");
        self.events
            .publish(types::PROJECT_PAUSED, json!({}), project_id);
        Ok(project)
    }

    /// Soft delete. Archived projects are hidden from default listings.
    pub fn archive_project(&self, project_id: &str) -> Result<Project> {
        let project = self.store.unit_of_work(|uow| {
            let project = uow.get_project(project_id)?;
            if project.status == ProjectStatus::Archived {
                return Err(AidenError::InvalidTransition(format!(
                    "project {} is already archived",
                    project_id
                )));
            }
            uow.update_project_status(project_id, ProjectStatus::Archived, project.current_phase)?;
            uow.get_project(project_id)
        })?;
        info!(project_id, "Project archived");
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<ProjectOverview> {
        self.store.unit_of_work(|uow| {
            Ok(ProjectOverview {
                project: uow.get_project(project_id)?,
                phases: uow.list_phases(project_id)?,
                deliverables: uow.list_deliverables(project_id)?,
            })
        })
    }

    pub fn list_projects(&self, include_archived: bool) -> Result<Vec<Project>> {
        self.store
            .unit_of_work(|uow| uow.list_projects(include_archived))
    }

    // --- Documents ---

    /// Store a document and index it for retrieval.
    pub fn add_document(
        &self,
        project_id: &str,
        doc_type: &str,
        filename: &str,
        content: &str,
    ) -> Result<Document> {
        if content.trim().is_empty() {
            return Err(AidenError::InvalidState(format!(
                "document '{}' is empty",
                filename
            )));
        }
        let document = Document {
            id: new_id(),
            project_id: project_id.to_string(),
            doc_type: doc_type.to_string(),
            filename: filename.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let chunks = chunk_text(content, self.chunk_size);
        self.store.unit_of_work(|uow| {
            uow.get_project(project_id)?;
            uow.insert_document(&document, &chunks)
        })?;
        info!(
            project_id,
            document_id = %document.id,
            doc_type,
            chunks = chunks.len(),
            "Document added"
        );
        Ok(document)
    }

    pub fn list_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        self.store.unit_of_work(|uow| uow.list_documents(project_id))
    }

    // --- Phases ---

    /// Run the agent for one phase until it completes, suspends or fails.
    ///
    /// A completed phase dispatches the next ready phase within the same call.
    pub fn start_phase<'a>(
        &'a self,
        project_id: &'a str,
        phase_id: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let phase = self.store.unit_of_work(|uow| uow.get_phase(phase_id))?;
            if phase.project_id != project_id {
                return Err(AidenError::not_found("Phase", phase_id));
            }
            let agent_name = self
                .phases
                .get_agent_for_phase(phase.phase_type)
                .ok_or_else(|| not_ready(phase.phase_type))?;
            let agent = self.agents.get(agent_name)?;
            if matches!(phase.status, PhaseStatus::Completed | PhaseStatus::HitlReview) {
                return Err(AidenError::InvalidTransition(format!(
                    "phase {} is {}",
                    phase_id, phase.status
                )));
            }

            let now = Utc::now();
            let mut execution = AgentExecution {
                id: new_id(),
                phase_id: phase.id.clone(),
                agent_name: agent_name.to_string(),
                thread_id: new_thread_id(project_id, phase.phase_type),
                status: ExecutionStatus::Initialized,
                total_tokens: 0,
                total_cost: 0.0,
                started_at: None,
                completed_at: None,
                error_message: None,
            };
            let input = self.store.unit_of_work(|uow| {
                if let Some(live) = live_execution(uow, &phase.id)? {
                    return Err(AidenError::InvalidTransition(format!(
                        "phase {} already has {} execution {}",
                        phase_id, live.status, live.id
                    )));
                }
                uow.insert_execution(&execution)?;
                let mut phase = phase.clone();
                phase.status = PhaseStatus::InProgress;
                phase.agent_name = Some(agent_name.to_string());
                phase.started_at = Some(now);
                phase.completed_at = None;
                uow.update_phase(&phase)?;
                uow.update_project_status(
                    project_id,
                    phase.phase_type.into(),
                    Some(phase.phase_type),
                )?;
                self.phase_input(uow, &phase, &execution)
            })?;

            info!(
                project_id,
                phase = %phase.phase_type,
                agent = agent_name,
                thread_id = %execution.thread_id,
                "Phase started"
            );
            self.emit(
                types::PHASE_STARTED,
                project_id,
                json!({ "phase_type": phase.phase_type }),
                Some(&execution),
            );

            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(Utc::now());
            self.store
                .unit_of_work(|uow| uow.update_execution(&execution))?;

            let lock = self.thread_lock(&execution.thread_id);
            let _guard = lock.lock().await;
            let result = agent.execute(input, &execution.thread_id).await;
            self.handle_outcome(project_id, &phase.id, execution, agent.as_ref(), result)
                .await
        })
    }

    // --- Reviews ---

    /// Record a human decision and resume the execution waiting on it.
    ///
    /// Nothing is written unless the review's execution is still running. If
    /// the process stops after the decision is recorded, `recover_execution`
    /// resumes from the stored decision.
    pub async fn handle_hitl_response(
        &self,
        review_id: &str,
        decision: Decision,
        feedback: Option<String>,
        edits: Option<Value>,
        decided_by: Option<String>,
    ) -> Result<()> {
        let Some(execution_id) = self.hitl.get_review(review_id)?.execution_id else {
            return Err(AidenError::InvalidState(format!(
                "review {} is not attached to an execution",
                review_id
            )));
        };
        let thread_id = self
            .store
            .unit_of_work(|uow| uow.get_execution(&execution_id))?
            .thread_id;
        let lock = self.thread_lock(&thread_id);
        let _guard = lock.lock().await;

        let (execution, phase) = self.execution_and_phase(&execution_id)?;
        if execution.status != ExecutionStatus::Running {
            return Err(AidenError::InvalidState(format!(
                "execution {} is {}, its reviews can no longer resume it",
                execution_id, execution.status
            )));
        }
        let agent_name = self
            .phases
            .get_agent_for_phase(phase.phase_type)
            .ok_or_else(|| not_ready(phase.phase_type))?;
        let agent = self.agents.get(agent_name)?;

        let payload = self
            .hitl
            .resolve_interrupt(review_id, decision, feedback, edits, decided_by)?;
        let result = agent.resume(&execution.thread_id, payload).await;
        self.handle_outcome(&phase.project_id, &phase.id, execution, agent.as_ref(), result)
            .await
    }

    pub fn list_pending_reviews(&self) -> Result<Vec<HitlReview>> {
        self.hitl.list_pending()
    }

    pub fn list_project_reviews(&self, project_id: &str) -> Result<Vec<HitlReview>> {
        self.store
            .unit_of_work(|uow| uow.list_reviews_for_project(project_id))
    }

    // --- Executions ---

    /// Execution row plus the agent's latest checkpoint, for observers that
    /// missed events.
    pub fn get_execution_state(&self, execution_id: &str) -> Result<ExecutionView> {
        let execution = self
            .store
            .unit_of_work(|uow| uow.get_execution(execution_id))?;
        let agent = self.agents.get(&execution.agent_name)?;
        let checkpoint = agent.get_state(&execution.thread_id)?;
        Ok(ExecutionView {
            execution,
            checkpoint,
        })
    }

    /// Drive a running execution forward after its process stopped.
    ///
    /// Dispatches on the thread's last checkpoint:
    /// - none: the agent never started, so it is executed from scratch;
    /// - running: the in-flight node is rerun;
    /// - suspended: resumes with the recorded decision once its review is
    ///   decided, or opens the review if it was never recorded;
    /// - completed or failed: the outcome is recorded.
    ///
    /// A thread that is waiting on an open review is left untouched.
    pub async fn recover_execution(&self, execution_id: &str) -> Result<()> {
        let thread_id = self
            .store
            .unit_of_work(|uow| uow.get_execution(execution_id))?
            .thread_id;
        let lock = self.thread_lock(&thread_id);
        let _guard = lock.lock().await;

        let (execution, phase) = self.execution_and_phase(execution_id)?;
        if execution.status != ExecutionStatus::Running {
            return Err(AidenError::InvalidState(format!(
                "execution {} is {}, only running executions can be recovered",
                execution_id, execution.status
            )));
        }
        let agent = self.agents.get(&execution.agent_name)?;

        let result = match agent.get_state(&thread_id)? {
            None => {
                info!(execution_id, %thread_id, "No checkpoint yet, executing from the start");
                let input = self
                    .store
                    .unit_of_work(|uow| self.phase_input(uow, &phase, &execution))?;
                agent.execute(input, &thread_id).await
            }
            Some(cp) => match cp.status {
                RunStatus::Running => {
                    info!(execution_id, %thread_id, "Recovering execution");
                    agent.recover(&thread_id).await
                }
                RunStatus::Suspended => match self.review_for_suspension(&execution, &cp)? {
                    Some(review) if !review.status.is_terminal() => {
                        return Err(AidenError::InvalidState(format!(
                            "execution {} is waiting on review {}",
                            execution_id, review.id
                        )));
                    }
                    Some(review) => {
                        info!(execution_id, review_id = %review.id, "Resuming with recorded decision");
                        let payload = self.hitl.decision_payload(&review.id)?;
                        agent.resume(&thread_id, payload).await
                    }
                    None => {
                        let interrupt = cp.interrupt.ok_or_else(|| {
                            AidenError::Checkpoint(format!(
                                "suspended thread '{}' has no interrupt",
                                thread_id
                            ))
                        })?;
                        info!(execution_id, review_type = %interrupt.review_type, "Opening unrecorded review");
                        Ok(RunOutcome::Suspended {
                            resume_token: thread_id.clone(),
                            interrupt,
                            state: cp.state,
                        })
                    }
                },
                RunStatus::Completed => Ok(RunOutcome::Completed { state: cp.state }),
                RunStatus::Failed => Err(AidenError::NodeFailed {
                    node: cp.last_node.unwrap_or_default(),
                    message: cp.state.get_str(ERROR).unwrap_or("unknown error").to_string(),
                }),
            },
        };
        self.handle_outcome(&phase.project_id, &phase.id, execution, agent.as_ref(), result)
            .await
    }

    /// The review opened for the suspension recorded in `cp`, matched by
    /// interrupt id.
    fn review_for_suspension(
        &self,
        execution: &AgentExecution,
        cp: &Checkpoint,
    ) -> Result<Option<HitlReview>> {
        let wanted = interrupt_id(cp);
        let reviews = self
            .store
            .unit_of_work(|uow| uow.list_reviews_for_execution(&execution.id))?;
        Ok(reviews
            .into_iter()
            .find(|r| r.interrupt_id.as_deref() == Some(wanted.as_str())))
    }

    fn execution_and_phase(&self, execution_id: &str) -> Result<(AgentExecution, Phase)> {
        self.store.unit_of_work(|uow| {
            let execution = uow.get_execution(execution_id)?;
            let phase = uow.get_phase(&execution.phase_id)?;
            Ok((execution, phase))
        })
    }

    // --- Deliverables ---

    pub fn list_deliverables(&self, project_id: &str) -> Result<Vec<Deliverable>> {
        self.store
            .unit_of_work(|uow| uow.list_deliverables(project_id))
    }

    pub fn deliverable_versions(
        &self,
        deliverable_id: &str,
    ) -> Result<(Deliverable, Vec<DeliverableVersion>)> {
        self.store.unit_of_work(|uow| {
            Ok((
                uow.get_deliverable(deliverable_id)?,
                uow.list_versions(deliverable_id)?,
            ))
        })
    }

    pub fn approve_deliverable(&self, deliverable_id: &str) -> Result<Deliverable> {
        let deliverable = self.store.unit_of_work(|uow| {
            uow.set_deliverable_status(deliverable_id, DeliverableStatus::Approved)?;
            uow.get_deliverable(deliverable_id)
        })?;
        info!(deliverable_id, version = deliverable.current_version, "Deliverable approved");
        Ok(deliverable)
    }

    // --- Outcome handling ---

    async fn handle_outcome(
        &self,
        project_id: &str,
        phase_id: &str,
        mut execution: AgentExecution,
        agent: &dyn Agent,
        result: Result<RunOutcome>,
    ) -> Result<()> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail_execution(project_id, phase_id, execution, agent, e)),
        };
        let (tokens, cost) = counters(outcome.state());
        execution.total_tokens = tokens;
        execution.total_cost = cost;

        match outcome {
            RunOutcome::Completed { state } if state.phase_status() == Some("completed") => {
                self.complete_phase(project_id, phase_id, execution, &state)
                    .await
            }
            RunOutcome::Completed { state } => {
                warn!(
                    execution_id = %execution.id,
                    phase_status = state.phase_status().unwrap_or("none"),
                    "Agent finished without completing its phase"
                );
                self.store
                    .unit_of_work(|uow| uow.update_execution(&execution))
            }
            RunOutcome::Suspended { interrupt, .. } => {
                self.store
                    .unit_of_work(|uow| uow.update_execution(&execution))?;
                let correlation = agent.get_state(&execution.thread_id)?.map(|cp| interrupt_id(&cp));
                self.hitl.create_interrupt(
                    &execution.id,
                    project_id,
                    &interrupt.review_type,
                    interrupt.content_snapshot(),
                    correlation.as_deref(),
                )?;
                Ok(())
            }
        }
    }

    async fn complete_phase(
        &self,
        project_id: &str,
        phase_id: &str,
        mut execution: AgentExecution,
        state: &GraphState,
    ) -> Result<()> {
        let now = Utc::now();
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(now);
        let (phase, project, written) = self.store.unit_of_work(|uow| {
            uow.update_execution(&execution)?;
            let mut phase = uow.get_phase(phase_id)?;
            phase.status = PhaseStatus::Completed;
            phase.completed_at = Some(now);
            uow.update_phase(&phase)?;
            let written = deliverables::persist(uow, &phase, state, &execution.agent_name)?;
            let project = uow.get_project(project_id)?;
            Ok((phase, project, written.len()))
        })?;
        self.release_lock(&execution.thread_id);

        info!(
            project_id,
            phase = %phase.phase_type,
            tokens = execution.total_tokens,
            deliverables = written,
            "Phase completed"
        );
        self.emit(
            types::PHASE_COMPLETED,
            project_id,
            json!({ "phase_type": phase.phase_type }),
            Some(&execution),
        );

        let Some(next) = self.phases.get_next_phase(phase.phase_type) else {
            self.store.unit_of_work(|uow| {
                uow.update_project_status(
                    project_id,
                    ProjectStatus::Completed,
                    Some(phase.phase_type),
                )
            })?;
            info!(project_id, "Project completed");
            self.events
                .publish(types::PROJECT_COMPLETED, json!({}), project_id);
            return Ok(());
        };

        if project.status == ProjectStatus::Paused {
            info!(project_id, next = %next, "Project paused, not dispatching next phase");
            return Ok(());
        }
        if !self.phases.is_phase_ready(next) {
            info!(project_id, next = %next, "Next phase has no agent, stopping");
            return Ok(());
        }
        let next_phase = self
            .store
            .unit_of_work(|uow| find_phase(uow, project_id, next))?;
        self.start_phase(project_id, &next_phase.id).await
    }

    /// Record a failed execution and turn the cause into the error returned
    /// to the caller.
    fn fail_execution(
        &self,
        project_id: &str,
        phase_id: &str,
        mut execution: AgentExecution,
        agent: &dyn Agent,
        cause: AidenError,
    ) -> AidenError {
        let message = cause.to_string();
        match agent.get_state(&execution.thread_id) {
            Ok(Some(cp)) => {
                let (tokens, cost) = counters(&cp.state);
                execution.total_tokens = tokens;
                execution.total_cost = cost;
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "No checkpoint for failed execution"),
        }
        execution.status = ExecutionStatus::Failed;
        execution.completed_at = Some(Utc::now());
        execution.error_message = Some(message.clone());

        let recorded = self.store.unit_of_work(|uow| {
            uow.update_execution(&execution)?;
            let mut phase = uow.get_phase(phase_id)?;
            phase.status = PhaseStatus::Failed;
            uow.update_phase(&phase)
        });
        if let Err(e) = recorded {
            error!(error = %e, execution_id = %execution.id, "Failed to record execution failure");
        }
        self.release_lock(&execution.thread_id);

        error!(
            project_id,
            execution_id = %execution.id,
            agent = %execution.agent_name,
            error = %message,
            "Agent execution failed"
        );
        self.emit(
            types::AGENT_ERROR,
            project_id,
            json!({ "error": message }),
            Some(&execution),
        );
        AidenError::AgentExecution {
            agent: execution.agent_name,
            message,
        }
    }

    fn phase_input(
        &self,
        uow: &UnitOfWork<'_>,
        phase: &Phase,
        execution: &AgentExecution,
    ) -> Result<Map<String, Value>> {
        let mut input = Map::new();
        input.insert("project_id".into(), json!(phase.project_id));
        input.insert("phase_id".into(), json!(phase.id));
        input.insert("execution_id".into(), json!(execution.id));
        if phase.phase_type == PhaseType::Analysis {
            let doc_id = uow
                .latest_document(&phase.project_id, &self.dev_request_doc_type)?
                .map(|d| d.id)
                .unwrap_or_else(|| NO_DOCUMENT.to_string());
            if doc_id.is_empty() {
                warn!(project_id = %phase.project_id, "No development request document on file");
            }
            input.insert("dev_request_doc_id".into(), json!(doc_id));
        }
        Ok(input)
    }

    fn emit(
        &self,
        event_type: &str,
        project_id: &str,
        data: Value,
        execution: Option<&AgentExecution>,
    ) {
        let mut event = Event::new(event_type, project_id, data);
        if let Some(execution) = execution {
            event = event
                .with_execution(execution.id.as_str())
                .with_agent(execution.agent_name.as_str());
        }
        self.events.publish_event(event);
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .thread_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(thread_id.to_string()).or_default().clone()
    }

    /// Forget the mutex of a thread that reached a terminal state.
    fn release_lock(&self, thread_id: &str) {
        let mut locks = self
            .thread_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(thread_id);
    }
}

fn find_phase(uow: &UnitOfWork<'_>, project_id: &str, phase_type: PhaseType) -> Result<Phase> {
    uow.find_phase(project_id, phase_type)?
        .ok_or_else(|| AidenError::not_found("Phase", format!("{}/{}", project_id, phase_type)))
}

/// The phase's latest execution if it has not finished.
fn live_execution(uow: &UnitOfWork<'_>, phase_id: &str) -> Result<Option<AgentExecution>> {
    Ok(uow
        .latest_execution(phase_id)?
        .filter(|e| !e.status.is_terminal()))
}

/// Correlates a review with the suspended checkpoint that requested it.
fn interrupt_id(cp: &Checkpoint) -> String {
    format!("{}#{}", cp.thread_id, cp.version)
}

fn not_ready(phase_type: PhaseType) -> AidenError {
    AidenError::PhaseNotReady {
        phase_type: phase_type.to_string(),
    }
}

fn counters(state: &GraphState) -> (u64, f64) {
    (
        state.get_as::<u64>("total_tokens").unwrap_or_default(),
        state.get_as::<f64>("total_cost").unwrap_or_default(),
    )
}
