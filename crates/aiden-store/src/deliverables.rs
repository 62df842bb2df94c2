use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use aiden_core::error::{AidenError, Result};
use aiden_core::types::{Deliverable, DeliverableStatus, DeliverableVersion};

use crate::store::*;

const DELIVERABLE_COLUMNS: &str =
    "id, phase_id, title, deliverable_type, status, current_version, format, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, deliverable_id, version_number, content, content_structured, \
                               change_summary, created_by, created_at";

fn deliverable_from_row(row: &Row<'_>) -> rusqlite::Result<Deliverable> {
    Ok(Deliverable {
        id: row.get(0)?,
        phase_id: row.get(1)?,
        title: row.get(2)?,
        deliverable_type: row.get(3)?,
        status: parse_enum(4, row.get(4)?)?,
        current_version: row.get(5)?,
        format: parse_enum(6, row.get(6)?)?,
        created_at: parse_ts(7, row.get(7)?)?,
        updated_at: parse_ts(8, row.get(8)?)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<DeliverableVersion> {
    Ok(DeliverableVersion {
        id: row.get(0)?,
        deliverable_id: row.get(1)?,
        version_number: row.get(2)?,
        content: row.get(3)?,
        content_structured: parse_opt_json(4, row.get(4)?)?,
        change_summary: row.get(5)?,
        created_by: row.get(6)?,
        created_at: parse_ts(7, row.get(7)?)?,
    })
}

impl UnitOfWork<'_> {
    pub fn insert_deliverable(&self, deliverable: &Deliverable) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO deliverables (id, phase_id, title, deliverable_type, status,
                     current_version, format, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    deliverable.id,
                    deliverable.phase_id,
                    deliverable.title,
                    deliverable.deliverable_type,
                    deliverable.status.as_str(),
                    deliverable.current_version,
                    deliverable.format.as_str(),
                    ts(&deliverable.created_at),
                    ts(&deliverable.updated_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_deliverable(&self, id: &str) -> Result<Deliverable> {
        self.tx
            .query_row(
                &format!("SELECT {} FROM deliverables WHERE id = ?1", DELIVERABLE_COLUMNS),
                params![id],
                deliverable_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| AidenError::not_found("Deliverable", id))
    }

    pub fn find_deliverable(
        &self,
        phase_id: &str,
        deliverable_type: &str,
    ) -> Result<Option<Deliverable>> {
        self.tx
            .query_row(
                &format!(
                    "SELECT {} FROM deliverables WHERE phase_id = ?1 AND deliverable_type = ?2",
                    DELIVERABLE_COLUMNS
                ),
                params![phase_id, deliverable_type],
                deliverable_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    /// Deliverables of a project across all phases, in phase order.
    pub fn list_deliverables(&self, project_id: &str) -> Result<Vec<Deliverable>> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT d.id, d.phase_id, d.title, d.deliverable_type, d.status, d.current_version,
                        d.format, d.created_at, d.updated_at
                 FROM deliverables d JOIN phases p ON p.id = d.phase_id
                 WHERE p.project_id = ?1
                 ORDER BY p.phase_order, d.created_at",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![project_id], deliverable_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn set_deliverable_status(&self, id: &str, status: DeliverableStatus) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE deliverables SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), ts(&Utc::now())],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AidenError::not_found("Deliverable", id));
        }
        Ok(())
    }

    /// Append a version. Its number must be exactly `current_version + 1`;
    /// the deliverable's `current_version` is advanced to it.
    pub fn append_version(&self, version: &DeliverableVersion) -> Result<()> {
        let deliverable = self.get_deliverable(&version.deliverable_id)?;
        if version.version_number != deliverable.current_version + 1 {
            return Err(AidenError::InvalidState(format!(
                "deliverable {} is at version {}, cannot append version {}",
                deliverable.id, deliverable.current_version, version.version_number
            )));
        }
        self.insert_version(version)?;
        self.tx
            .execute(
                "UPDATE deliverables SET current_version = ?2, updated_at = ?3 WHERE id = ?1",
                params![deliverable.id, version.version_number, ts(&Utc::now())],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert a version row as-is. Used for the initial version.
    pub fn insert_version(&self, version: &DeliverableVersion) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO deliverable_versions (id, deliverable_id, version_number, content,
                     content_structured, change_summary, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    version.id,
                    version.deliverable_id,
                    version.version_number,
                    version.content,
                    version.content_structured.as_ref().map(|v| v.to_string()),
                    version.change_summary,
                    version.created_by,
                    ts(&version.created_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_version(&self, deliverable_id: &str, version_number: u32) -> Result<DeliverableVersion> {
        self.tx
            .query_row(
                &format!(
                    "SELECT {} FROM deliverable_versions WHERE deliverable_id = ?1 AND version_number = ?2",
                    VERSION_COLUMNS
                ),
                params![deliverable_id, version_number],
                version_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| {
                AidenError::not_found("DeliverableVersion", format!("{}@{}", deliverable_id, version_number))
            })
    }

    pub fn list_versions(&self, deliverable_id: &str) -> Result<Vec<DeliverableVersion>> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT {} FROM deliverable_versions WHERE deliverable_id = ?1 ORDER BY version_number",
                VERSION_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![deliverable_id], version_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seed_project;
    use crate::Store;
    use aiden_core::types::{new_id, DeliverableFormat};

    fn version(deliverable_id: &str, n: u32, content: &str) -> DeliverableVersion {
        DeliverableVersion {
            id: new_id(),
            deliverable_id: deliverable_id.into(),
            version_number: n,
            content: content.into(),
            content_structured: None,
            change_summary: None,
            created_by: "ryan".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn versions_advance_without_gaps() {
        let store = Store::in_memory().unwrap();
        let (project, phases) = seed_project(&store);
        let now = Utc::now();
        let deliverable = Deliverable {
            id: new_id(),
            phase_id: phases[0].id.clone(),
            title: "Requirements Specification".into(),
            deliverable_type: "requirements_spec".into(),
            status: DeliverableStatus::Draft,
            current_version: 1,
            format: DeliverableFormat::Markdown,
            created_at: now,
            updated_at: now,
        };
        store
            .unit_of_work(|uow| {
                uow.insert_deliverable(&deliverable)?;
                uow.insert_version(&version(&deliverable.id, 1, "v1"))
            })
            .unwrap();

        store
            .unit_of_work(|uow| uow.append_version(&version(&deliverable.id, 2, "v2")))
            .unwrap();
        let gap = store.unit_of_work(|uow| uow.append_version(&version(&deliverable.id, 4, "v4")));
        assert!(matches!(gap, Err(AidenError::InvalidState(_))));

        let loaded = store
            .unit_of_work(|uow| uow.find_deliverable(&phases[0].id, "requirements_spec"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.current_version, 2);
        let versions = store.unit_of_work(|uow| uow.list_versions(&loaded.id)).unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2]);

        let listed = store.unit_of_work(|uow| uow.list_deliverables(&project.id)).unwrap();
        assert_eq!(listed.len(), 1);
    }
}
