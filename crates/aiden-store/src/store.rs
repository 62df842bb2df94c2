use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use aiden_core::error::{AidenError, Result};

use crate::schema::SCHEMA;

/// SQLite-backed store for every pipeline entity.
///
/// All reads and writes go through [`Store::unit_of_work`], which runs the
/// closure inside a single transaction.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AidenError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        Self::init(conn, Some(path))
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        if let Some(path) = path {
            debug!(path = %path.display(), "Store opened");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one transaction. Committed if `f` returns `Ok`,
    /// rolled back otherwise.
    pub fn unit_of_work<T>(&self, f: impl FnOnce(&UnitOfWork<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| AidenError::Database(e.to_string()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let uow = UnitOfWork { tx };
        let out = f(&uow)?;
        uow.tx.commit().map_err(db_err)?;
        Ok(out)
    }
}

/// An open transaction over the store. Entity operations live in the
/// per-entity modules.
pub struct UnitOfWork<'conn> {
    pub(crate) tx: Transaction<'conn>,
}

pub(crate) fn db_err(e: rusqlite::Error) -> AidenError {
    AidenError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so stored values compare lexically.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, s)).transpose()
}

pub(crate) fn parse_enum<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = AidenError>,
{
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn parse_json(idx: usize, raw: String) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn parse_opt_json(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<serde_json::Value>> {
    raw.map(|s| parse_json(idx, s)).transpose()
}

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiden_core::types::{new_id, Project, ProjectStatus};

    fn project(name: &str) -> Project {
        let now = Utc::now();
        Project {
            id: new_id(),
            name: name.into(),
            description: None,
            status: ProjectStatus::Created,
            current_phase: None,
            config: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let store = Store::in_memory().unwrap();
        let p = project("rolled back");
        let err = store
            .unit_of_work(|uow| {
                uow.insert_project(&p)?;
                Err::<(), _>(AidenError::InvalidState("abort".into()))
            })
            .unwrap_err();
        assert!(matches!(err, AidenError::InvalidState(_)));

        let found = store.unit_of_work(|uow| uow.find_project(&p.id)).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aiden.db");
        let p = project("durable");
        {
            let store = Store::open(&path).unwrap();
            store.unit_of_work(|uow| uow.insert_project(&p)).unwrap();
        }
        let store = Store::open(&path).unwrap();
        let loaded = store.unit_of_work(|uow| uow.get_project(&p.id)).unwrap();
        assert_eq!(loaded.name, "durable");
    }
}
