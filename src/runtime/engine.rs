/// Petgraph-based execution coordinator
///
/// Orchestrates a complete run: acquires the idempotency slot, loads and
/// validates the workflow version, walks nodes in topological order through
/// the `NodeExecutor`, and persists the finalized `ExecutionRecord`.
///
/// Each run is owned by exactly one task. While it is in flight its latest
/// snapshot lives on the coordinator's live board so status queries and
/// deduplicated callers see progress; once persisted it leaves the board.

use crate::runtime::executor::{NodeExecutor, NodeRun};
use crate::runtime::idempotency::{Acquisition, IdempotencyStore};
use crate::runtime::record::{ExecutionRecord, ExecutionStatus, ExecutionStore, LogEntry, NodeStatus};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::registry::WorkflowStore;
use crate::workflow::types::{ExecutionContext, FailurePolicy, NodeType, WorkflowDefinition};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A request to run a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub workflow_id: String,
    /// Specific version; latest when absent
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Start here instead of the workflow's single trigger
    #[serde(default)]
    pub start_node: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl ExecuteRequest {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn starting_at(mut self, node_id: impl Into<String>) -> Self {
        self.start_node = Some(node_id.into());
        self
    }

    pub fn at_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }
}

/// What a caller gets back from `execute_tracked` / `submit`
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub record: ExecutionRecord,
    /// True when an earlier call with the same key owns the run
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub idempotency_ttl: Duration,
    pub run_timeout: Duration,
    /// Serialized outputs and errors longer than this are cut in the log
    pub log_output_limit: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            run_timeout: Duration::from_secs(300),
            log_output_limit: 2000,
        }
    }
}

struct LiveRun {
    record: ExecutionRecord,
    cancel: CancellationToken,
}

/// What happened to a node, as seen by its downstream edges
struct NodeResult {
    status: NodeStatus,
    node_type: NodeType,
    branch: Option<String>,
}

pub struct ExecutionCoordinator {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    executor: Arc<NodeExecutor>,
    idempotency: Arc<IdempotencyStore>,
    settings: CoordinatorSettings,
    live: Mutex<HashMap<Uuid, LiveRun>>,
    /// Finished records the execution store refused to persist
    unsaved: Mutex<HashMap<Uuid, ExecutionRecord>>,
}

impl ExecutionCoordinator {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        executor: Arc<NodeExecutor>,
        idempotency: Arc<IdempotencyStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            workflows,
            executions,
            executor,
            idempotency,
            settings,
            live: Mutex::new(HashMap::new()),
            unsaved: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<Uuid, LiveRun>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsaved(&self) -> MutexGuard<'_, HashMap<Uuid, ExecutionRecord>> {
        self.unsaved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_snapshot(&self, record: &ExecutionRecord) {
        if let Some(run) = self.live().get_mut(&record.id) {
            run.record = record.clone();
        }
    }

    /// Run a workflow to completion and return its final record
    ///
    /// A repeated idempotency key returns the existing record's current
    /// state instead of running again.
    pub async fn execute(&self, request: ExecuteRequest) -> ExecutionRecord {
        self.execute_tracked(request).await.record
    }

    /// `execute`, reporting whether the call was deduplicated
    pub async fn execute_tracked(&self, request: ExecuteRequest) -> Dispatch {
        match self.admit(&request).await {
            Admission::Existing(record) => Dispatch {
                record,
                deduplicated: true,
            },
            Admission::New(record, cancel) => Dispatch {
                record: self.run(record, request, cancel).await,
                deduplicated: false,
            },
        }
    }

    /// Accept a run and execute it on its own task
    ///
    /// Returns the queued record immediately.
    pub async fn submit(self: &Arc<Self>, request: ExecuteRequest) -> Dispatch {
        match self.admit(&request).await {
            Admission::Existing(record) => Dispatch {
                record,
                deduplicated: true,
            },
            Admission::New(record, cancel) => {
                let snapshot = record.clone();
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    coordinator.run(record, request, cancel).await;
                });
                Dispatch {
                    record: snapshot,
                    deduplicated: false,
                }
            }
        }
    }

    async fn admit(&self, request: &ExecuteRequest) -> Admission {
        let cancel = CancellationToken::new();
        let mut queued = None;

        // The board entry is inserted under the idempotency lock, so a racing
        // caller that sees the key also sees the run.
        let acquisition = self.idempotency.acquire_with(
            &request.workflow_id,
            request.idempotency_key.as_deref(),
            self.settings.idempotency_ttl,
            |execution_id| {
                let record = ExecutionRecord::queued(
                    execution_id,
                    &request.workflow_id,
                    request.version.unwrap_or(0),
                    request.idempotency_key.clone(),
                );
                self.live().insert(
                    execution_id,
                    LiveRun {
                        record: record.clone(),
                        cancel: cancel.clone(),
                    },
                );
                queued = Some(record);
            },
        );

        match (acquisition, queued) {
            (Acquisition::New(_), Some(record)) => Admission::New(record, cancel),
            (acquisition, _) => {
                let execution_id = acquisition.execution_id();
                tracing::info!("🔁 Duplicate request for workflow {} (key {:?}), returning execution {}",
                    request.workflow_id, request.idempotency_key, execution_id);
                let record = match self.status(execution_id).await {
                    Ok(Some(record)) => record,
                    Ok(None) => ExecutionRecord::queued(execution_id, &request.workflow_id, request.version.unwrap_or(0), request.idempotency_key.clone()),
                    Err(e) => {
                        tracing::error!("❌ Failed to load execution {}: {}", execution_id, e);
                        ExecutionRecord::queued(execution_id, &request.workflow_id, request.version.unwrap_or(0), request.idempotency_key.clone())
                    }
                };
                Admission::Existing(record)
            }
        }
    }

    /// Current state of an execution: live snapshot first, then records that
    /// failed to persist, then storage
    pub async fn status(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>> {
        let live = self.live().get(&execution_id).map(|run| run.record.clone());
        if live.is_some() {
            return Ok(live);
        }
        let unsaved = self.unsaved().get(&execution_id).cloned();
        if unsaved.is_some() {
            return Ok(unsaved);
        }
        self.executions.get_execution_record(execution_id).await
    }

    /// Flag an in-flight execution as cancelled
    ///
    /// Takes effect before the next node starts. Returns false when the
    /// execution is not running.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.live().get(&execution_id) {
            Some(run) => {
                tracing::info!("🛑 Cancellation requested for execution {}", execution_id);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of runs currently in flight
    pub fn in_flight(&self) -> usize {
        self.live().len()
    }

    async fn run(&self, mut record: ExecutionRecord, request: ExecuteRequest, cancel: CancellationToken) -> ExecutionRecord {
        let run_start_time = Instant::now();
        record.status = ExecutionStatus::Running;
        self.publish_snapshot(&record);

        let status = match self.workflows.load_workflow(&request.workflow_id, request.version).await {
            Ok(Some(definition)) => {
                record.workflow_version = definition.version;
                tracing::info!("🚀 Starting workflow execution: {} v{} (execution {})",
                    definition.id, definition.version, record.id);
                self.publish_snapshot(&record);
                self.walk(&definition, &request, &mut record, &cancel).await
            }
            Ok(None) => {
                let reason = match request.version {
                    Some(v) => format!("workflow not found: {} v{}", request.workflow_id, v),
                    None => format!("workflow not found: {}", request.workflow_id),
                };
                tracing::error!("❌ {}", reason);
                record.logs.push(LogEntry::run_marker(NodeStatus::Failed, reason));
                ExecutionStatus::Failed
            }
            Err(e) => {
                tracing::error!("❌ Failed to load workflow {}: {}", request.workflow_id, e);
                record.logs.push(LogEntry::run_marker(NodeStatus::Failed, format!("failed to load workflow: {}", e)));
                ExecutionStatus::Failed
            }
        };

        record.finalize(status);
        match status {
            ExecutionStatus::Success => tracing::info!("🎉 Execution {} completed successfully in {:?}", record.id, run_start_time.elapsed()),
            ExecutionStatus::Recovered => tracing::warn!("🩹 Execution {} recovered from node failures in {:?}", record.id, run_start_time.elapsed()),
            _ => tracing::error!("💥 Execution {} failed after {:?}", record.id, run_start_time.elapsed()),
        }

        // Leaves the board only once the final record is reachable elsewhere
        if let Err(e) = self.executions.save_execution_record(&record).await {
            tracing::error!("❌ Failed to persist execution {}, keeping it in memory: {}", record.id, e);
            self.unsaved().insert(record.id, record.clone());
        }
        self.live().remove(&record.id);
        record
    }

    /// Validate, order and execute the nodes; returns the final status
    async fn walk(
        &self,
        definition: &WorkflowDefinition,
        request: &ExecuteRequest,
        record: &mut ExecutionRecord,
        cancel: &CancellationToken,
    ) -> ExecutionStatus {
        let graph = WorkflowGraph::new(definition);

        let errors = graph.validate(request.start_node.as_deref());
        if !errors.is_empty() {
            let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
            tracing::error!("❌ Workflow {} failed validation: {}", definition.id, message);
            record.logs.push(LogEntry::run_marker(NodeStatus::Failed, format!("validation failed: {}", message)));
            return ExecutionStatus::Failed;
        }

        let order = match graph.topological_order() {
            Ok(order) => order,
            Err(e) => {
                record.logs.push(LogEntry::run_marker(NodeStatus::Failed, e.to_string()));
                return ExecutionStatus::Failed;
            }
        };

        let scheduled: Vec<&str> = match request.start_node.as_deref() {
            Some(start) => {
                let reachable = graph.reachable_from(start);
                order.iter().map(String::as_str).filter(|id| reachable.contains(*id)).collect()
            }
            None => order.iter().map(String::as_str).collect(),
        };
        let scheduled_set: HashSet<&str> = scheduled.iter().copied().collect();
        tracing::debug!("📋 Execution order: {:?}", scheduled);

        let mut context = ExecutionContext::new(&definition.id, record.id, request.payload.clone());
        let mut results: HashMap<&str, NodeResult> = HashMap::new();
        let deadline = Instant::now() + self.settings.run_timeout;
        let mut recovered = false;

        for (step, node_id) in scheduled.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("🛑 Execution {} cancelled before node '{}'", record.id, node_id);
                record.logs.push(LogEntry::run_marker(NodeStatus::Cancelled, "execution cancelled"));
                return ExecutionStatus::Failed;
            }
            if Instant::now() >= deadline {
                tracing::warn!("⏰ Execution {} exceeded run timeout of {:?}", record.id, self.settings.run_timeout);
                cancel.cancel();
                record.logs.push(LogEntry::run_marker(
                    NodeStatus::Cancelled,
                    format!("run timed out after {:?}", self.settings.run_timeout),
                ));
                return ExecutionStatus::Failed;
            }

            let Some(node) = graph.node(node_id) else {
                continue;
            };

            // Edges from nodes outside the schedule never fire; a node with
            // none left counts as a root
            let incoming: Vec<_> = graph
                .incoming(node_id)
                .into_iter()
                .filter(|c| scheduled_set.contains(c.from_node.as_str()))
                .collect();
            let active = incoming.is_empty()
                || incoming.iter().any(|connection| {
                    results.get(connection.from_node.as_str()).is_some_and(|upstream| {
                        upstream.status == NodeStatus::Success
                            && (upstream.node_type != NodeType::Condition
                                || connection.branch.is_none()
                                || connection.branch == upstream.branch)
                    })
                });

            if !active {
                tracing::info!("⏭️ Step {}/{}: skipping node '{}'", step + 1, scheduled.len(), node_id);
                record.logs.push(LogEntry::skipped(node_id, node.node_type));
                results.insert(node_id, NodeResult {
                    status: NodeStatus::Skipped,
                    node_type: node.node_type,
                    branch: None,
                });
                self.publish_snapshot(record);
                continue;
            }

            tracing::info!("📍 Step {}/{}: Executing node '{}' (type: {:?})", step + 1, scheduled.len(), node_id, node.node_type);
            let run = self.executor.run(node, &context).await;
            record.logs.push(self.log_entry(node_id, node.node_type, &run));

            results.insert(node_id, NodeResult {
                status: run.status,
                node_type: node.node_type,
                branch: run.branch.clone(),
            });

            let failed = run.status == NodeStatus::Failed;
            if let Some(output) = run.output {
                if run.status == NodeStatus::Success {
                    context.outputs.insert(node_id.to_string(), output);
                }
            }
            self.publish_snapshot(record);

            if failed {
                match node.failure_policy() {
                    FailurePolicy::Abort => {
                        tracing::error!("❌ Node '{}' failed, aborting execution {}", node_id, record.id);
                        return ExecutionStatus::Failed;
                    }
                    FailurePolicy::Continue => {
                        tracing::warn!("⚠️ Node '{}' failed, continuing (on_failure = continue)", node_id);
                        recovered = true;
                    }
                }
            }
        }

        if recovered {
            ExecutionStatus::Recovered
        } else {
            ExecutionStatus::Success
        }
    }

    fn log_entry(&self, node_id: &str, node_type: NodeType, run: &NodeRun) -> LogEntry {
        let limit = self.settings.log_output_limit;
        LogEntry {
            node_id: Some(node_id.to_string()),
            node_type: Some(node_type),
            status: run.status,
            output: run.output.as_ref().map(|output| truncate_output(output, limit)),
            error: run.error.as_deref().map(|error| truncate_str(error, limit)),
            branch: run.branch.clone(),
            duration_ms: run.duration.as_millis().min(u64::MAX as u128) as u64,
            retries: run.retries,
            logged_at: Utc::now(),
        }
    }
}

enum Admission {
    New(ExecutionRecord, CancellationToken),
    Existing(ExecutionRecord),
}

fn truncate_str(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &text[..end])
}

/// Outputs whose JSON form exceeds `limit` bytes are replaced by a cut string
fn truncate_output(output: &Value, limit: usize) -> Value {
    let serialized = output.to_string();
    if serialized.len() <= limit {
        output.clone()
    } else {
        Value::String(truncate_str(&serialized, limit))
    }
}
