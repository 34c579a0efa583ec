/// SQLite persistence layer
///
/// Stores every published workflow version and every execution record.
/// Definitions and records are stored as JSON with a few indexed columns
/// alongside for lookups.

use crate::runtime::record::{ExecutionRecord, ExecutionStore};
use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use std::path::Path;
use uuid::Uuid;

/// SQLite-backed store for workflow versions and execution records
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and initialize the schema
    pub async fn connect(data_dir: &str, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))?;
        let db_path = Path::new(data_dir).join(file_name);

        tracing::info!("🗄️ Opening database: {}", db_path.display());
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables if they do not exist; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_versions (
                id TEXT NOT NULL,
                version INTEGER NOT NULL,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workflow_version INTEGER NOT NULL,
                idempotency_key TEXT,
                status TEXT NOT NULL,
                record JSON NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist one immutable workflow version
    ///
    /// Returns false when that version number is already taken, leaving the
    /// stored definition untouched.
    pub async fn save_workflow_version(&self, definition: &WorkflowDefinition) -> Result<bool> {
        let definition_json = serde_json::to_string(definition)?;

        let result = sqlx::query(
            "INSERT INTO workflow_versions (id, version, name, definition) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id, version) DO NOTHING",
        )
        .bind(&definition.id)
        .bind(definition.version as i64)
        .bind(&definition.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load every stored version of every workflow
    pub async fn load_all_versions(&self) -> Result<Vec<WorkflowDefinition>> {
        let rows = sqlx::query("SELECT definition FROM workflow_versions ORDER BY id, version")
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            let definition_json: String = row.get("definition");
            definitions.push(serde_json::from_str(&definition_json)?);
        }
        Ok(definitions)
    }

    /// List workflows with their latest version
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, version, created_at FROM workflow_versions w
            WHERE version = (SELECT MAX(version) FROM workflow_versions WHERE id = w.id)
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                latest_version: row.get::<i64, _>("version") as u32,
                updated_at: row.get("created_at"),
            })
            .collect())
    }

    /// Delete every version of a workflow; execution history is kept
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_versions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    /// Upsert a record; a record already stored with a terminal status is left untouched
    async fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        let record_json = serde_json::to_string(record)?;

        let result = sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, workflow_version, idempotency_key, status, record, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record,
                completed_at = excluded.completed_at
            WHERE executions.status NOT IN ('success', 'failed', 'recovered')
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.workflow_id)
        .bind(record.workflow_version as i64)
        .bind(&record.idempotency_key)
        .bind(record.status.as_str())
        .bind(&record_json)
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("execution record {} is finalized and cannot be overwritten", record.id);
        }
        Ok(())
    }

    async fn get_execution_record(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let record_json: String = row.get("record");
                Ok(Some(serde_json::from_str(&record_json)?))
            }
            None => Ok(None),
        }
    }
}

/// Basic workflow metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub latest_version: u32,
    pub updated_at: String,
}
