use rusqlite::{params, OptionalExtension, Row};

use aiden_core::error::{AidenError, Result};
use aiden_core::types::AgentExecution;

use crate::store::*;

const COLUMNS: &str = "id, phase_id, agent_name, thread_id, status, total_tokens, total_cost, \
                       started_at, completed_at, error_message";

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<AgentExecution> {
    Ok(AgentExecution {
        id: row.get(0)?,
        phase_id: row.get(1)?,
        agent_name: row.get(2)?,
        thread_id: row.get(3)?,
        status: parse_enum(4, row.get(4)?)?,
        total_tokens: row.get::<_, i64>(5)? as u64,
        total_cost: row.get(6)?,
        started_at: parse_opt_ts(7, row.get(7)?)?,
        completed_at: parse_opt_ts(8, row.get(8)?)?,
        error_message: row.get(9)?,
    })
}

impl UnitOfWork<'_> {
    /// Insert a new execution. A duplicate thread id is a collision error.
    pub fn insert_execution(&self, execution: &AgentExecution) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO agent_executions (id, phase_id, agent_name, thread_id, status, total_tokens,
                     total_cost, started_at, completed_at, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    execution.id,
                    execution.phase_id,
                    execution.agent_name,
                    execution.thread_id,
                    execution.status.as_str(),
                    execution.total_tokens as i64,
                    execution.total_cost,
                    opt_ts(&execution.started_at),
                    opt_ts(&execution.completed_at),
                    execution.error_message,
                    ts(&chrono::Utc::now()),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AidenError::ThreadIdCollision(execution.thread_id.clone())
                } else {
                    db_err(e)
                }
            })?;
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> Result<AgentExecution> {
        self.tx
            .query_row(
                &format!("SELECT {} FROM agent_executions WHERE id = ?1", COLUMNS),
                params![id],
                execution_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| AidenError::not_found("AgentExecution", id))
    }

    pub fn find_execution_by_thread(&self, thread_id: &str) -> Result<Option<AgentExecution>> {
        self.tx
            .query_row(
                &format!("SELECT {} FROM agent_executions WHERE thread_id = ?1", COLUMNS),
                params![thread_id],
                execution_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    /// Executions of a phase, oldest first.
    pub fn list_executions(&self, phase_id: &str) -> Result<Vec<AgentExecution>> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT {} FROM agent_executions WHERE phase_id = ?1 ORDER BY created_at, rowid",
                COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![phase_id], execution_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn latest_execution(&self, phase_id: &str) -> Result<Option<AgentExecution>> {
        self.tx
            .query_row(
                &format!(
                    "SELECT {} FROM agent_executions WHERE phase_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    COLUMNS
                ),
                params![phase_id],
                execution_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    /// Persist status, counters, timestamps and error. The thread id is immutable.
    pub fn update_execution(&self, execution: &AgentExecution) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE agent_executions
                 SET status = ?2, total_tokens = ?3, total_cost = ?4, started_at = ?5,
                     completed_at = ?6, error_message = ?7
                 WHERE id = ?1",
                params![
                    execution.id,
                    execution.status.as_str(),
                    execution.total_tokens as i64,
                    execution.total_cost,
                    opt_ts(&execution.started_at),
                    opt_ts(&execution.completed_at),
                    execution.error_message,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AidenError::not_found("AgentExecution", &execution.id));
        }
        Ok(())
    }
}
