use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use aiden_core::error::{AidenError, Result};
use aiden_core::types::{HitlReview, ReviewDecision};

use crate::store::*;

const REVIEW_COLUMNS: &str = "id, execution_id, review_type, status, content_snapshot, interrupt_id, \
                              reviewer, assigned_at, decided_at, deadline_at, created_at";

const OPEN_STATUSES: &str = "('pending', 'in_review')";

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<HitlReview> {
    Ok(HitlReview {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        review_type: row.get(2)?,
        status: parse_enum(3, row.get(3)?)?,
        content_snapshot: parse_json(4, row.get(4)?)?,
        interrupt_id: row.get(5)?,
        reviewer: row.get(6)?,
        assigned_at: parse_opt_ts(7, row.get(7)?)?,
        decided_at: parse_opt_ts(8, row.get(8)?)?,
        deadline_at: parse_opt_ts(9, row.get(9)?)?,
        created_at: parse_ts(10, row.get(10)?)?,
    })
}

fn decision_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewDecision> {
    Ok(ReviewDecision {
        id: row.get(0)?,
        review_id: row.get(1)?,
        decision: parse_enum(2, row.get(2)?)?,
        feedback: row.get(3)?,
        edits: parse_opt_json(4, row.get(4)?)?,
        decided_by: row.get(5)?,
        created_at: parse_ts(6, row.get(6)?)?,
    })
}

impl UnitOfWork<'_> {
    pub fn insert_review(&self, review: &HitlReview) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO hitl_reviews (id, execution_id, review_type, status, content_snapshot,
                     interrupt_id, reviewer, assigned_at, decided_at, deadline_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    review.id,
                    review.execution_id,
                    review.review_type,
                    review.status.as_str(),
                    review.content_snapshot.to_string(),
                    review.interrupt_id,
                    review.reviewer,
                    opt_ts(&review.assigned_at),
                    opt_ts(&review.decided_at),
                    opt_ts(&review.deadline_at),
                    ts(&review.created_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_review(&self, id: &str) -> Result<HitlReview> {
        self.tx
            .query_row(
                &format!("SELECT {} FROM hitl_reviews WHERE id = ?1", REVIEW_COLUMNS),
                params![id],
                review_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| AidenError::not_found("HITLReview", id))
    }

    /// Persist status, reviewer and decision timestamps.
    pub fn update_review(&self, review: &HitlReview) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE hitl_reviews
                 SET status = ?2, reviewer = ?3, assigned_at = ?4, decided_at = ?5
                 WHERE id = ?1",
                params![
                    review.id,
                    review.status.as_str(),
                    review.reviewer,
                    opt_ts(&review.assigned_at),
                    opt_ts(&review.decided_at),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AidenError::not_found("HITLReview", &review.id));
        }
        Ok(())
    }

    fn query_reviews(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<HitlReview>> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT {} FROM hitl_reviews WHERE {} ORDER BY created_at, rowid",
                REVIEW_COLUMNS, filter
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map(args, review_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Reviews awaiting a decision (pending or claimed), oldest first.
    pub fn list_open_reviews(&self) -> Result<Vec<HitlReview>> {
        self.query_reviews(&format!("status IN {}", OPEN_STATUSES), params![])
    }

    pub fn list_reviews_for_execution(&self, execution_id: &str) -> Result<Vec<HitlReview>> {
        self.query_reviews("execution_id = ?1", params![execution_id])
    }

    /// Reviews of a project, through its phases' executions.
    pub fn list_reviews_for_project(&self, project_id: &str) -> Result<Vec<HitlReview>> {
        self.query_reviews(
            "execution_id IN (
                 SELECT e.id FROM agent_executions e
                 JOIN phases p ON p.id = e.phase_id
                 WHERE p.project_id = ?1)",
            params![project_id],
        )
    }

    /// Open reviews whose deadline is before `now`.
    pub fn list_overdue_reviews(&self, now: DateTime<Utc>) -> Result<Vec<HitlReview>> {
        // RFC 3339 in UTC sorts lexically.
        self.query_reviews(
            &format!(
                "status IN {} AND deadline_at IS NOT NULL AND deadline_at < ?1",
                OPEN_STATUSES
            ),
            params![ts(&now)],
        )
    }

    /// Count non-terminal reviews attached to any execution of the phase.
    pub fn count_open_reviews_for_phase(&self, phase_id: &str) -> Result<usize> {
        let count: i64 = self
            .tx
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM hitl_reviews r
                     JOIN agent_executions e ON e.id = r.execution_id
                     WHERE e.phase_id = ?1 AND r.status IN {}",
                    OPEN_STATUSES
                ),
                params![phase_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }

    pub fn insert_decision(&self, decision: &ReviewDecision) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO review_decisions (id, review_id, decision, feedback, edits, decided_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    decision.id,
                    decision.review_id,
                    decision.decision.as_str(),
                    decision.feedback,
                    decision.edits.as_ref().map(|e| e.to_string()),
                    decision.decided_by,
                    ts(&decision.created_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn list_decisions(&self, review_id: &str) -> Result<Vec<ReviewDecision>> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT id, review_id, decision, feedback, edits, decided_by, created_at
                 FROM review_decisions WHERE review_id = ?1 ORDER BY created_at, rowid",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![review_id], decision_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
