// packages/engine/src/runtime/error_reporter.rs
//! Broken-agent reporting
//!
//! At the end of a run the launcher hands its [`BrokenAgentRecord`] list to
//! an [`ErrorReporter`] for durable storage. [`SqliteErrorReporter`] writes
//! them to an `agent_errors` table.

use crate::registry::{BrokenAgentRecord, JobId};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, job: Option<JobId>, records: &[BrokenAgentRecord]) -> Result<()>;
}

/// Logs each broken agent and stores nothing
#[derive(Debug, Default)]
pub struct LogErrorReporter;

#[async_trait]
impl ErrorReporter for LogErrorReporter {
    async fn report(&self, job: Option<JobId>, records: &[BrokenAgentRecord]) -> Result<()> {
        for record in records {
            warn!(
                "Broken agent {} ({}) in job {}: {} - {}",
                record.agent_name,
                record.agent,
                job.map(|j| j.to_string()).unwrap_or_else(|| "-".into()),
                record.error_kind,
                record.detail
            );
        }
        Ok(())
    }
}

/// Keeps reported records in memory
#[derive(Debug, Default)]
pub struct InMemoryErrorReporter {
    records: SyncMutex<Vec<(Option<JobId>, BrokenAgentRecord)>>,
}

impl InMemoryErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<BrokenAgentRecord> {
        self.records.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ErrorReporter for InMemoryErrorReporter {
    async fn report(&self, job: Option<JobId>, records: &[BrokenAgentRecord]) -> Result<()> {
        self.records
            .lock()
            .extend(records.iter().cloned().map(|r| (job, r)));
        Ok(())
    }
}

/// SQLite-backed error store
pub struct SqliteErrorReporter {
    db: Arc<Mutex<Connection>>,
}

impl SqliteErrorReporter {
    /// Open (or create) the database at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            EngineError::StorageFailed(format!("Failed to open error database: {}", e))
        })?;
        let reporter = Self::with_connection(conn).await?;
        info!("Error reporter writing to {:?}", path);
        Ok(reporter)
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self> {
        let reporter = Self {
            db: Arc::new(Mutex::new(conn)),
        };
        reporter.init_schema().await?;
        Ok(reporter)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS agent_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT,
                agent_id INTEGER NOT NULL,
                agent_name TEXT NOT NULL,
                error TEXT NOT NULL,
                detail TEXT NOT NULL,
                date_logged TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("Schema creation failed: {}", e)))?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_errors_agent ON agent_errors(agent_id)",
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("Index creation failed: {}", e)))?;

        Ok(())
    }

    /// Stored records for one agent, oldest first
    pub async fn errors_for(&self, agent: crate::registry::AgentId) -> Result<Vec<StoredAgentError>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT job_id, agent_name, error, detail, date_logged FROM agent_errors WHERE agent_id = ? ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![agent.0 as i64], |row| {
                Ok(StoredAgentError {
                    job_id: row.get(0)?,
                    agent_name: row.get(1)?,
                    error: row.get(2)?,
                    detail: row.get(3)?,
                    date_logged: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub async fn count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM agent_errors", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ErrorReporter for SqliteErrorReporter {
    async fn report(&self, job: Option<JobId>, records: &[BrokenAgentRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO agent_errors (job_id, agent_id, agent_name, error, detail, date_logged) VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for record in records {
                stmt.execute(params![
                    job.map(|j| j.to_string()),
                    record.agent.0 as i64,
                    record.agent_name,
                    record.error_kind,
                    record.detail,
                    record.logged_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;

        debug!("Stored {} broken agent records", records.len());
        Ok(())
    }
}

/// Row of the `agent_errors` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAgentError {
    pub job_id: Option<String>,
    pub agent_name: String,
    pub error: String,
    pub detail: String,
    pub date_logged: String,
}
