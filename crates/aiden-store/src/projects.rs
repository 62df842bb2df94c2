use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use aiden_core::error::{AidenError, Result};
use aiden_core::types::{Phase, PhaseType, Project, ProjectStatus};

use crate::store::*;

const PROJECT_COLUMNS: &str =
    "id, name, description, status, current_phase, config, created_at, updated_at";

const PHASE_COLUMNS: &str =
    "id, project_id, phase_type, phase_order, status, agent_name, started_at, completed_at";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        status: parse_enum(3, row.get(3)?)?,
        current_phase: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_enum(4, s))
            .transpose()?,
        config: parse_json(5, row.get(5)?)?,
        created_at: parse_ts(6, row.get(6)?)?,
        updated_at: parse_ts(7, row.get(7)?)?,
    })
}

fn phase_from_row(row: &Row<'_>) -> rusqlite::Result<Phase> {
    Ok(Phase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        phase_type: parse_enum(2, row.get(2)?)?,
        phase_order: row.get(3)?,
        status: parse_enum(4, row.get(4)?)?,
        agent_name: row.get(5)?,
        started_at: parse_opt_ts(6, row.get(6)?)?,
        completed_at: parse_opt_ts(7, row.get(7)?)?,
    })
}

impl UnitOfWork<'_> {
    pub fn insert_project(&self, project: &Project) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO projects (id, name, description, status, current_phase, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    project.id,
                    project.name,
                    project.description,
                    project.status.as_str(),
                    project.current_phase.map(|p| p.as_str()),
                    project.config.to_string(),
                    ts(&project.created_at),
                    ts(&project.updated_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn find_project(&self, id: &str) -> Result<Option<Project>> {
        self.tx
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                project_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        self.find_project(id)?
            .ok_or_else(|| AidenError::not_found("Project", id))
    }

    /// Projects newest first. Archived projects are hidden unless asked for.
    pub fn list_projects(&self, include_archived: bool) -> Result<Vec<Project>> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT {} FROM projects
                 WHERE ?1 OR status != 'archived'
                 ORDER BY created_at DESC",
                PROJECT_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![include_archived], project_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Set status and current phase, bumping `updated_at`.
    pub fn update_project_status(
        &self,
        id: &str,
        status: ProjectStatus,
        current_phase: Option<PhaseType>,
    ) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE projects SET status = ?2, current_phase = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    id,
                    status.as_str(),
                    current_phase.map(|p| p.as_str()),
                    ts(&Utc::now())
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AidenError::not_found("Project", id));
        }
        Ok(())
    }

    pub fn insert_phase(&self, phase: &Phase) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO phases (id, project_id, phase_type, phase_order, status, agent_name, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    phase.id,
                    phase.project_id,
                    phase.phase_type.as_str(),
                    phase.phase_order,
                    phase.status.as_str(),
                    phase.agent_name,
                    opt_ts(&phase.started_at),
                    opt_ts(&phase.completed_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_phase(&self, id: &str) -> Result<Phase> {
        self.tx
            .query_row(
                &format!("SELECT {} FROM phases WHERE id = ?1", PHASE_COLUMNS),
                params![id],
                phase_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| AidenError::not_found("Phase", id))
    }

    pub fn find_phase(&self, project_id: &str, phase_type: PhaseType) -> Result<Option<Phase>> {
        self.tx
            .query_row(
                &format!(
                    "SELECT {} FROM phases WHERE project_id = ?1 AND phase_type = ?2",
                    PHASE_COLUMNS
                ),
                params![project_id, phase_type.as_str()],
                phase_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    /// Phases of a project in pipeline order.
    pub fn list_phases(&self, project_id: &str) -> Result<Vec<Phase>> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT {} FROM phases WHERE project_id = ?1 ORDER BY phase_order",
                PHASE_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![project_id], phase_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn update_phase(&self, phase: &Phase) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE phases SET status = ?2, agent_name = ?3, started_at = ?4, completed_at = ?5
                 WHERE id = ?1",
                params![
                    phase.id,
                    phase.status.as_str(),
                    phase.agent_name,
                    opt_ts(&phase.started_at),
                    opt_ts(&phase.completed_at),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AidenError::not_found("Phase", &phase.id));
        }
        Ok(())
    }
}
