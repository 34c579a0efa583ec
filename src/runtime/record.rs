/// Execution records and their storage contract
///
/// An `ExecutionRecord` is created when a run is accepted and is mutated only
/// by the coordinator task that owns the run. Once its status is terminal
/// (Success, Failed, Recovered) stores refuse to overwrite it.

use crate::workflow::types::NodeType;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Success,
    Failed,
    /// Completed, but at least one node with `on_failure: continue` failed
    Recovered,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Recovered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Recovered => "recovered",
        }
    }
}

/// Outcome of a single log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
    /// Run-level marker written when the cancellation flag stops a run
    Cancelled,
}

/// One line of the audit trail
///
/// Node entries carry `node_id`; run-level markers (validation failure,
/// cancellation) leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub node_id: Option<String>,
    pub node_type: Option<NodeType>,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Branch selected by a Condition node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub duration_ms: u64,
    /// Retries performed after the first attempt
    pub retries: u32,
    pub logged_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn run_marker(status: NodeStatus, error: impl Into<String>) -> Self {
        Self {
            node_id: None,
            node_type: None,
            status,
            output: None,
            error: Some(error.into()),
            branch: None,
            duration_ms: 0,
            retries: 0,
            logged_at: Utc::now(),
        }
    }

    pub fn skipped(node_id: &str, node_type: NodeType) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            node_type: Some(node_type),
            status: NodeStatus::Skipped,
            output: None,
            error: None,
            branch: None,
            duration_ms: 0,
            retries: 0,
            logged_at: Utc::now(),
        }
    }
}

/// The persisted result of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub idempotency_key: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub logs: Vec<LogEntry>,
}

impl ExecutionRecord {
    pub fn queued(id: Uuid, workflow_id: &str, workflow_version: u32, idempotency_key: Option<String>) -> Self {
        Self {
            id,
            workflow_id: workflow_id.to_string(),
            workflow_version,
            idempotency_key,
            status: ExecutionStatus::Queued,
            started_at: Utc::now(),
            completed_at: None,
            logs: Vec::new(),
        }
    }

    /// Retries per node id
    pub fn retry_counts(&self) -> HashMap<String, u32> {
        self.logs
            .iter()
            .filter_map(|entry| entry.node_id.clone().map(|id| (id, entry.retries)))
            .collect()
    }

    /// Node ids in log order (run markers excluded)
    pub fn node_order(&self) -> Vec<&str> {
        self.logs.iter().filter_map(|entry| entry.node_id.as_deref()).collect()
    }

    pub fn log_for(&self, node_id: &str) -> Option<&LogEntry> {
        self.logs.iter().find(|entry| entry.node_id.as_deref() == Some(node_id))
    }

    pub(crate) fn finalize(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Persistence contract for execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()>;
    async fn get_execution_record(&self, id: Uuid) -> Result<Option<ExecutionRecord>>;
}

/// In-memory execution store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<Uuid, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.id) {
            if existing.status.is_terminal() {
                anyhow::bail!("execution record {} is finalized and cannot be overwritten", record.id);
            }
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_execution_record(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }
}
