//! Snapshot persistence for crash recovery.
//!
//! The durability model is one blob per run: after every state-changing
//! engine call the complete engine snapshot (wallet plus open orders) is
//! serialised and overwritten atomically under its `run_id`. Per-step
//! report fragments append under the same key. Recovery restores exactly
//! the stored blob — partial updates are not possible.
//!
//! Uses Turso (Rust rewrite of `SQLite`) for durable storage.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use turso::{Builder, Database, Error as TursoError, Value};

use crate::exchange::EngineSnapshot;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Query error: {0}")]
    Query(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Missing required field in a stored row.
    #[error("Missing field: {0}")]
    MissingField(String),
}

impl From<TursoError> for PersistenceError {
    fn from(err: TursoError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// One report fragment, appended per decision step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFragment {
    /// Decision step index, starting at zero.
    pub step: i64,
    /// Virtual time at the end of the step (Unix seconds).
    pub at: i64,
    /// Equity sampled at the end of the step.
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
    /// Orders accepted during the step.
    pub orders_placed: u32,
    /// Soft failures recorded during the step.
    pub soft_failures: u32,
}

/// Snapshot store over a Turso database.
pub struct SnapshotStore {
    db: Database,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Open (or create) a local database file.
    ///
    /// # Errors
    ///
    /// Connection or migration failures.
    pub async fn new_local(db_path: &str) -> Result<Self, PersistenceError> {
        let db = Builder::new_local(db_path).build().await?;
        Self::run_migrations(&db).await?;
        Ok(Self { db })
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    ///
    /// Connection or migration failures.
    pub async fn new_in_memory() -> Result<Self, PersistenceError> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::run_migrations(&db).await?;
        Ok(Self { db })
    }

    async fn run_migrations(db: &Database) -> Result<(), PersistenceError> {
        let conn = db.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_snapshots (
                run_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                taken_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS report_fragments (
                run_id TEXT NOT NULL,
                step INTEGER NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (run_id, step)
            );",
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        info!("Snapshot store migrations complete");
        Ok(())
    }

    /// Overwrite the snapshot blob for a run.
    ///
    /// # Errors
    ///
    /// Serialization or query failures; the previous blob stays intact on
    /// failure.
    pub async fn save_snapshot(
        &self,
        run_id: &str,
        snapshot: &EngineSnapshot,
    ) -> Result<(), PersistenceError> {
        let conn = self.db.connect()?;
        let payload = serde_json::to_string(snapshot)?;

        let params: Vec<Value> = vec![
            Value::Text(run_id.to_string()),
            Value::Text(payload),
            Value::Integer(snapshot.current_time),
        ];

        conn.execute(
            "INSERT OR REPLACE INTO run_snapshots (run_id, payload, taken_at)
             VALUES (?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        debug!(run_id = %run_id, "Snapshot saved");
        Ok(())
    }

    /// Load the snapshot blob for a run, if one exists.
    ///
    /// # Errors
    ///
    /// Query or deserialization failures.
    pub async fn load_snapshot(
        &self,
        run_id: &str,
    ) -> Result<Option<EngineSnapshot>, PersistenceError> {
        let conn = self.db.connect()?;
        let params: Vec<Value> = vec![Value::Text(run_id.to_string())];

        let mut rows = conn
            .query(
                "SELECT payload FROM run_snapshots WHERE run_id = ?",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        else {
            return Ok(None);
        };

        let payload = row
            .get::<String>(0)
            .map_err(|e| PersistenceError::MissingField(format!("payload: {e}")))?;
        let snapshot = serde_json::from_str(&payload)?;
        Ok(Some(snapshot))
    }

    /// Append (or overwrite) one step's report fragment.
    ///
    /// # Errors
    ///
    /// Serialization or query failures.
    pub async fn append_fragment(
        &self,
        run_id: &str,
        fragment: &StepFragment,
    ) -> Result<(), PersistenceError> {
        let conn = self.db.connect()?;
        let payload = serde_json::to_string(fragment)?;

        let params: Vec<Value> = vec![
            Value::Text(run_id.to_string()),
            Value::Integer(fragment.step),
            Value::Text(payload),
        ];

        conn.execute(
            "INSERT OR REPLACE INTO report_fragments (run_id, step, payload)
             VALUES (?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        Ok(())
    }

    /// Load a run's report fragments in step order.
    ///
    /// # Errors
    ///
    /// Query or deserialization failures.
    pub async fn load_fragments(
        &self,
        run_id: &str,
    ) -> Result<Vec<StepFragment>, PersistenceError> {
        let conn = self.db.connect()?;
        let params: Vec<Value> = vec![Value::Text(run_id.to_string())];

        let mut rows = conn
            .query(
                "SELECT payload FROM report_fragments WHERE run_id = ? ORDER BY step",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut fragments = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            let payload = row
                .get::<String>(0)
                .map_err(|e| PersistenceError::MissingField(format!("payload: {e}")))?;
            fragments.push(serde_json::from_str(&payload)?);
        }
        Ok(fragments)
    }
}
