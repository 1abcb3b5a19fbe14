use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::types::RunId;

use crate::graph::RunState;

/// A stage that paused the run waiting for a human reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub stage: String,
    pub prompt: String,
}

/// Snapshot of a run, taken after every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub graph: String,
    pub run_id: RunId,
    pub state: S,
    /// Stage that runs next; `None` once the terminal has run.
    pub next_stage: Option<String>,
    pub pending: Option<PendingTask>,
    /// Stage executions so far.
    pub step: usize,
    /// Stages executed, in order.
    pub visited: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl<S> Checkpoint<S> {
    pub fn is_finished(&self) -> bool {
        self.next_stage.is_none() && self.pending.is_none()
    }
}

/// Storage for run checkpoints, keyed by graph name and run id.
///
/// Safe for concurrent use across independent runs.
pub trait CheckpointStore<S: RunState>: Send + Sync + 'static {
    /// Insert or replace the checkpoint for `(graph, run_id)`.
    fn save(&self, checkpoint: Checkpoint<S>) -> BoxFuture<'_, Result<()>>;

    fn load(&self, graph: &str, run_id: &RunId) -> BoxFuture<'_, Result<Option<Checkpoint<S>>>>;

    /// Returns whether a checkpoint was removed.
    fn delete(&self, graph: &str, run_id: &RunId) -> BoxFuture<'_, Result<bool>>;
}

/// Process-lifetime checkpoint store.
pub struct MemoryCheckpointStore<S> {
    checkpoints: RwLock<HashMap<(String, RunId), Checkpoint<S>>>,
}

impl<S> MemoryCheckpointStore<S> {
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

impl<S> Default for MemoryCheckpointStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RunState> CheckpointStore<S> for MemoryCheckpointStore<S> {
    fn save(&self, checkpoint: Checkpoint<S>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let key = (checkpoint.graph.clone(), checkpoint.run_id.clone());
            self.checkpoints.write().await.insert(key, checkpoint);
            Ok(())
        })
    }

    fn load(&self, graph: &str, run_id: &RunId) -> BoxFuture<'_, Result<Option<Checkpoint<S>>>> {
        let key = (graph.to_string(), run_id.clone());
        Box::pin(async move { Ok(self.checkpoints.read().await.get(&key).cloned()) })
    }

    fn delete(&self, graph: &str, run_id: &RunId) -> BoxFuture<'_, Result<bool>> {
        let key = (graph.to_string(), run_id.clone());
        Box::pin(async move { Ok(self.checkpoints.write().await.remove(&key).is_some()) })
    }
}

fn db_err(e: impl std::fmt::Display) -> PitchlensError {
    PitchlensError::Database(e.to_string())
}

/// Persistent checkpoint store backed by SQLite. State is stored as JSON, so
/// one database serves every workflow.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| db_err(format!("Failed to create checkpoint directory: {}", e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| db_err(format!("Failed to open checkpoint store: {}", e)))?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 graph TEXT NOT NULL,
                 run_id TEXT NOT NULL,
                 state_json TEXT NOT NULL,
                 next_stage TEXT,
                 pending_json TEXT,
                 step INTEGER NOT NULL,
                 visited_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL,
                 PRIMARY KEY (graph, run_id)
             );",
        )
        .map_err(|e| db_err(format!("Failed to initialize checkpoint schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Raw row as stored, decoded outside the connection lock.
struct StoredRow {
    state_json: String,
    next_stage: Option<String>,
    pending_json: Option<String>,
    step: i64,
    visited_json: String,
    updated_at: String,
}

impl<S: RunState> CheckpointStore<S> for SqliteCheckpointStore {
    fn save(&self, checkpoint: Checkpoint<S>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let state_json = serde_json::to_string(&checkpoint.state)?;
            let pending_json = checkpoint
                .pending
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let visited_json = serde_json::to_string(&checkpoint.visited)?;

            let conn = self.conn.lock().map_err(db_err)?;
            conn.execute(
                "INSERT OR REPLACE INTO checkpoints
                 (graph, run_id, state_json, next_stage, pending_json, step, visited_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    checkpoint.graph,
                    checkpoint.run_id.as_str(),
                    state_json,
                    checkpoint.next_stage,
                    pending_json,
                    checkpoint.step as i64,
                    visited_json,
                    checkpoint.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| db_err(format!("Failed to save checkpoint: {}", e)))?;
            Ok(())
        })
    }

    fn load(&self, graph: &str, run_id: &RunId) -> BoxFuture<'_, Result<Option<Checkpoint<S>>>> {
        let graph = graph.to_string();
        let run_id = run_id.clone();
        Box::pin(async move {
            let row = {
                let conn = self.conn.lock().map_err(db_err)?;
                conn.query_row(
                    "SELECT state_json, next_stage, pending_json, step, visited_json, updated_at
                     FROM checkpoints
                     WHERE graph = ?1 AND run_id = ?2",
                    params![graph, run_id.as_str()],
                    |row| {
                        Ok(StoredRow {
                            state_json: row.get(0)?,
                            next_stage: row.get(1)?,
                            pending_json: row.get(2)?,
                            step: row.get(3)?,
                            visited_json: row.get(4)?,
                            updated_at: row.get(5)?,
                        })
                    },
                )
                .optional()
                .map_err(db_err)?
            };

            let Some(row) = row else {
                return Ok(None);
            };

            Ok(Some(Checkpoint {
                graph,
                run_id,
                state: serde_json::from_str(&row.state_json)?,
                next_stage: row.next_stage,
                pending: row
                    .pending_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?,
                step: row.step as usize,
                visited: serde_json::from_str(&row.visited_json)?,
                updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            }))
        })
    }

    fn delete(&self, graph: &str, run_id: &RunId) -> BoxFuture<'_, Result<bool>> {
        let graph = graph.to_string();
        let run_id = run_id.clone();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let deleted = conn
                .execute(
                    "DELETE FROM checkpoints WHERE graph = ?1 AND run_id = ?2",
                    params![graph, run_id.as_str()],
                )
                .map_err(|e| db_err(format!("Failed to delete checkpoint: {}", e)))?;
            Ok(deleted > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Notes {
        lines: Vec<String>,
        error: Option<String>,
    }

    impl RunState for Notes {
        fn error(&self) -> Option<&str> {
            self.error.as_deref()
        }
        fn error_slot(&mut self) -> &mut Option<String> {
            &mut self.error
        }
    }

    fn checkpoint(run: &str, step: usize, pending: Option<PendingTask>) -> Checkpoint<Notes> {
        Checkpoint {
            graph: "notes".into(),
            run_id: RunId::from_str(run),
            state: Notes {
                lines: vec![format!("step {}", step)],
                error: None,
            },
            next_stage: Some("write".into()),
            pending,
            step,
            visited: vec!["read".into()],
            updated_at: Utc::now(),
        }
    }

    async fn exercise(store: &dyn CheckpointStore<Notes>) {
        let run = RunId::from_str("r1");
        assert!(store.load("notes", &run).await.unwrap().is_none());

        store.save(checkpoint("r1", 1, None)).await.unwrap();
        store
            .save(checkpoint(
                "r1",
                2,
                Some(PendingTask {
                    stage: "write".into(),
                    prompt: "Which deck?".into(),
                }),
            ))
            .await
            .unwrap();

        let cp = store.load("notes", &run).await.unwrap().unwrap();
        assert_eq!(cp.step, 2);
        assert_eq!(cp.state.lines, vec!["step 2"]);
        assert_eq!(cp.pending.as_ref().unwrap().prompt, "Which deck?");
        assert_eq!(cp.visited, vec!["read"]);
        assert!(!cp.is_finished());

        // Same run id under another graph is a different key
        assert!(store.load("other", &run).await.unwrap().is_none());

        assert!(store.delete("notes", &run).await.unwrap());
        assert!(!store.delete("notes", &run).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::<Notes>::new();
        exercise(&store).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp").join("checkpoints.db");
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            CheckpointStore::<Notes>::save(&store, checkpoint("r9", 3, None))
                .await
                .unwrap();
        }
        let store = SqliteCheckpointStore::open(&path).unwrap();
        let cp: Checkpoint<Notes> = store
            .load("notes", &RunId::from_str("r9"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.step, 3);
    }
}
