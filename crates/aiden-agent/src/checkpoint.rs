use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use aiden_core::error::{AidenError, Result};
use aiden_core::types::InterruptRequest;

use crate::graph::state::GraphState;

/// Lifecycle of one thread as recorded in its latest checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AidenError::Checkpoint(format!("unknown run status '{}'", other))),
        }
    }
}

/// A durable snapshot of a state machine, written after every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Monotonic per thread, starting at 1.
    pub version: u64,
    pub status: RunStatus,
    /// Node that produced this snapshot.
    pub last_node: Option<String>,
    /// Node to run when execution continues from here.
    pub next_node: Option<String>,
    /// Set while the thread is suspended.
    pub interrupt: Option<InterruptRequest>,
    pub state: GraphState,
    pub created_at: DateTime<Utc>,
}

/// Persistent checkpoint store backed by SQLite.
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

fn cp_err(context: &str, e: impl std::fmt::Display) -> AidenError {
    AidenError::Checkpoint(format!("{}: {}", context, e))
}

const CHECKPOINT_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS checkpoints (
        thread_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        status TEXT NOT NULL,
        last_node TEXT,
        next_node TEXT,
        interrupt_json TEXT,
        state_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (thread_id, version)
    );
";

impl CheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| cp_err("Failed to create checkpoint directory", e))?;
        }

        let conn =
            Connection::open(path).map_err(|e| cp_err("Failed to open checkpoint store", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| cp_err("Failed to configure checkpoint store", e))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| cp_err("Failed to open checkpoint store", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CHECKPOINT_SCHEMA)
            .map_err(|e| cp_err("Failed to initialize checkpoint schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a checkpoint. Rewriting an existing version is an error.
    pub fn save(&self, cp: &Checkpoint) -> Result<()> {
        let state_json = serde_json::to_string(&cp.state)?;
        let interrupt_json = cp
            .interrupt
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn.lock().map_err(|e| cp_err("lock poisoned", e))?;
        conn.execute(
            "INSERT INTO checkpoints
                 (thread_id, version, status, last_node, next_node, interrupt_json, state_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                cp.thread_id,
                cp.version as i64,
                cp.status.as_str(),
                cp.last_node,
                cp.next_node,
                interrupt_json,
                state_json,
                cp.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )
        .map_err(|e| cp_err("Failed to save checkpoint", e))?;
        Ok(())
    }

    /// Latest checkpoint for a thread.
    pub fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock().map_err(|e| cp_err("lock poisoned", e))?;
        let row = conn
            .query_row(
                "SELECT thread_id, version, status, last_node, next_node, interrupt_json, state_json, created_at
                 FROM checkpoints WHERE thread_id = ?1
                 ORDER BY version DESC LIMIT 1",
                params![thread_id],
                RawCheckpoint::from_row,
            )
            .optional()
            .map_err(|e| cp_err("Failed to load checkpoint", e))?;
        row.map(RawCheckpoint::decode).transpose()
    }

    /// All checkpoints of a thread, oldest first.
    pub fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let conn = self.conn.lock().map_err(|e| cp_err("lock poisoned", e))?;
        let mut stmt = conn
            .prepare(
                "SELECT thread_id, version, status, last_node, next_node, interrupt_json, state_json, created_at
                 FROM checkpoints WHERE thread_id = ?1
                 ORDER BY version ASC",
            )
            .map_err(|e| cp_err("Failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![thread_id], RawCheckpoint::from_row)
            .map_err(|e| cp_err("Failed to load checkpoints", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| cp_err("Failed to load checkpoints", e))?;
        rows.into_iter().map(RawCheckpoint::decode).collect()
    }

    /// Drop all but the newest `keep_last` checkpoints of a thread.
    pub fn prune(&self, thread_id: &str, keep_last: usize) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| cp_err("lock poisoned", e))?;
        let deleted = conn
            .execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1 AND version NOT IN (
                     SELECT version FROM checkpoints WHERE thread_id = ?1
                     ORDER BY version DESC LIMIT ?2
                 )",
                params![thread_id, keep_last as i64],
            )
            .map_err(|e| cp_err("Failed to prune checkpoints", e))?;
        Ok(deleted)
    }

    /// Delete every checkpoint of a thread.
    pub fn delete(&self, thread_id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| cp_err("lock poisoned", e))?;
        conn.execute(
            "DELETE FROM checkpoints WHERE thread_id = ?1",
            params![thread_id],
        )
        .map_err(|e| cp_err("Failed to delete checkpoints", e))
    }
}

struct RawCheckpoint {
    thread_id: String,
    version: i64,
    status: String,
    last_node: Option<String>,
    next_node: Option<String>,
    interrupt_json: Option<String>,
    state_json: String,
    created_at: String,
}

impl RawCheckpoint {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            thread_id: row.get(0)?,
            version: row.get(1)?,
            status: row.get(2)?,
            last_node: row.get(3)?,
            next_node: row.get(4)?,
            interrupt_json: row.get(5)?,
            state_json: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Checkpoint> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| cp_err("Bad checkpoint timestamp", e))?;
        Ok(Checkpoint {
            thread_id: self.thread_id,
            version: self.version as u64,
            status: RunStatus::parse(&self.status)?,
            last_node: self.last_node,
            next_node: self.next_node,
            interrupt: self
                .interrupt_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            state: serde_json::from_str(&self.state_json)?,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::StateSchema;
    use serde_json::{json, Map};

    fn checkpoint(thread_id: &str, version: u64, status: RunStatus) -> Checkpoint {
        let mut input = Map::new();
        input.insert("project_id".into(), json!("p-1"));
        let state = StateSchema::new()
            .overwrite("project_id", serde_json::Value::Null)
            .initial_state(input)
            .unwrap();
        Checkpoint {
            thread_id: thread_id.to_string(),
            version,
            status,
            last_node: Some(format!("node_{}", version)),
            next_node: Some(format!("node_{}", version + 1)),
            interrupt: None,
            state,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn latest_wins_and_history_is_ordered() {
        let store = CheckpointStore::in_memory().unwrap();
        store.save(&checkpoint("t1", 1, RunStatus::Running)).unwrap();
        store.save(&checkpoint("t1", 2, RunStatus::Running)).unwrap();
        store.save(&checkpoint("t2", 1, RunStatus::Running)).unwrap();

        let mut suspended = checkpoint("t1", 3, RunStatus::Suspended);
        suspended.interrupt = Some(InterruptRequest {
            node: "review".into(),
            review_type: "final_review".into(),
            message: "ready".into(),
            content: json!({"draft": "..."}),
        });
        store.save(&suspended).unwrap();

        let latest = store.load_latest("t1").unwrap().unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.status, RunStatus::Suspended);
        assert_eq!(latest.interrupt.unwrap().node, "review");
        assert_eq!(latest.state.get_str("project_id"), Some("p-1"));

        let versions: Vec<u64> = store.history("t1").unwrap().iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(store.load_latest("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_version_rejected() {
        let store = CheckpointStore::in_memory().unwrap();
        store.save(&checkpoint("t1", 1, RunStatus::Running)).unwrap();
        let err = store.save(&checkpoint("t1", 1, RunStatus::Running)).unwrap_err();
        assert!(matches!(err, AidenError::Checkpoint(_)));
    }

    #[test]
    fn prune_keeps_newest() {
        let store = CheckpointStore::in_memory().unwrap();
        for v in 1..=5 {
            store.save(&checkpoint("t1", v, RunStatus::Running)).unwrap();
        }
        assert_eq!(store.prune("t1", 2).unwrap(), 3);
        let versions: Vec<u64> = store.history("t1").unwrap().iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![4, 5]);
        assert_eq!(store.delete("t1").unwrap(), 2);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp").join("checkpoints.db");
        {
            let store = CheckpointStore::open(&path).unwrap();
            store.save(&checkpoint("t1", 1, RunStatus::Completed)).unwrap();
        }
        let store = CheckpointStore::open(&path).unwrap();
        let latest = store.load_latest("t1").unwrap().unwrap();
        assert_eq!(latest.status, RunStatus::Completed);
    }
}
