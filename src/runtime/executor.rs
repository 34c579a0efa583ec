/// Node execution handlers
///
/// Dispatch goes through a handler table keyed by node type:
/// - Trigger: outputs the run payload, marks the start of the run
/// - Action: calls the named side effect through an `ActionInvoker`
/// - Condition: evaluates a predicate and selects a branch label
/// - Delay: suspends the run's task for the configured duration
/// - AI: routes the prompt through `AiProviderRouter::invoke_with_fallback`
///
/// Handlers only read the execution context; recording outcomes is the
/// coordinator's job. Retries for Action and AI nodes live here.

use crate::ai::{AiProviderRouter, AiTask, Requirements, StructuredOutput};
use crate::error::NodeExecutionError;
use crate::runtime::actions::ActionInvoker;
use crate::runtime::condition::Condition;
use crate::runtime::record::NodeStatus;
use crate::workflow::types::{ExecutionContext, Node, NodeType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant inside an automated workflow. Answer concisely.";

/// What a handler produced for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub output: Value,
    pub status: NodeStatus,
    /// Branch label chosen by a Condition node
    pub branch: Option<String>,
}

impl NodeOutcome {
    pub fn success(output: Value) -> Self {
        Self {
            output,
            status: NodeStatus::Success,
            branch: None,
        }
    }

    pub fn branch(output: Value, label: impl Into<String>) -> Self {
        Self {
            output,
            status: NodeStatus::Success,
            branch: Some(label.into()),
        }
    }
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(&self, node: &Node, context: &ExecutionContext) -> Result<NodeOutcome, NodeExecutionError>;
}

/// Result of running one node, retries included
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRun {
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub branch: Option<String>,
    pub retries: u32,
    pub duration: Duration,
}

impl NodeRun {
    pub fn succeeded(&self) -> bool {
        self.status == NodeStatus::Success
    }
}

/// Trigger nodes pass the payload through
#[derive(Debug, Default)]
pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn run(&self, _node: &Node, context: &ExecutionContext) -> Result<NodeOutcome, NodeExecutionError> {
        Ok(NodeOutcome::success(context.payload.clone()))
    }
}

pub struct ActionHandler {
    invoker: Arc<dyn ActionInvoker>,
}

impl ActionHandler {
    pub fn new(invoker: Arc<dyn ActionInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl NodeHandler for ActionHandler {
    async fn run(&self, node: &Node, context: &ExecutionContext) -> Result<NodeOutcome, NodeExecutionError> {
        let action = node.config_str("action").ok_or_else(|| NodeExecutionError::MissingConfig {
            node_id: node.id.clone(),
            key: "action".to_string(),
        })?;
        let output = self.invoker.invoke(action, node, context).await?;
        Ok(NodeOutcome::success(output))
    }
}

#[derive(Debug, Default)]
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn run(&self, node: &Node, context: &ExecutionContext) -> Result<NodeOutcome, NodeExecutionError> {
        let condition = Condition::from_node(node)?;
        let result = condition
            .evaluate(&context.to_json())
            .map_err(|reason| NodeExecutionError::InvalidConfig {
                node_id: node.id.clone(),
                reason,
            })?;
        let branch = condition.branch_for(result).to_string();
        tracing::debug!("🔀 Condition {} -> {} (branch '{}')", node.id, result, branch);
        Ok(NodeOutcome::branch(json!({ "result": result, "branch": branch }), branch))
    }
}

/// Sleeps for `seconds` or `milliseconds`, capped at `max_delay`
#[derive(Debug)]
pub struct DelayHandler {
    max_delay: Duration,
}

impl DelayHandler {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }

    fn duration(&self, node: &Node) -> Result<Duration, NodeExecutionError> {
        let invalid = |reason: &str| NodeExecutionError::InvalidConfig {
            node_id: node.id.clone(),
            reason: reason.to_string(),
        };

        let requested = if let Some(ms) = node.config.get("milliseconds") {
            Duration::from_millis(ms.as_u64().ok_or_else(|| invalid("milliseconds must be a non-negative integer"))?)
        } else if let Some(secs) = node.config.get("seconds") {
            let secs = secs.as_f64().filter(|s| *s >= 0.0 && s.is_finite()).ok_or_else(|| invalid("seconds must be a non-negative number"))?;
            Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
        } else {
            return Err(NodeExecutionError::MissingConfig {
                node_id: node.id.clone(),
                key: "seconds".to_string(),
            });
        };

        Ok(requested.min(self.max_delay))
    }
}

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn run(&self, node: &Node, _context: &ExecutionContext) -> Result<NodeOutcome, NodeExecutionError> {
        let duration = self.duration(node)?;
        tracing::info!("⏳ Delay {} for {:?}", node.id, duration);
        tokio::time::sleep(duration).await;
        Ok(NodeOutcome::success(json!({ "delayed_ms": duration.as_millis() as u64 })))
    }
}

pub struct AiHandler {
    router: Arc<AiProviderRouter>,
}

impl AiHandler {
    pub fn new(router: Arc<AiProviderRouter>) -> Self {
        Self { router }
    }

    fn requirements(node: &Node) -> Requirements {
        let defaults = Requirements::default();
        Requirements {
            min_context_length: node
                .config
                .get("min_context_length")
                .and_then(Value::as_u64)
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.min_context_length),
            max_cost_per_1k: node.config.get("max_cost_per_1k").and_then(Value::as_f64).unwrap_or(defaults.max_cost_per_1k),
            speed_priority: node.config.get("speed_priority").and_then(Value::as_bool).unwrap_or(defaults.speed_priority),
        }
    }
}

#[async_trait]
impl NodeHandler for AiHandler {
    async fn run(&self, node: &Node, context: &ExecutionContext) -> Result<NodeOutcome, NodeExecutionError> {
        let prompt = node.config_str("prompt").ok_or_else(|| NodeExecutionError::MissingConfig {
            node_id: node.id.clone(),
            key: "prompt".to_string(),
        })?;
        let task = match node.config_str("task") {
            Some(name) => AiTask::from_name(name).ok_or_else(|| NodeExecutionError::InvalidConfig {
                node_id: node.id.clone(),
                reason: format!("unknown AI task '{}'", name),
            })?,
            None => AiTask::Generate,
        };

        let mut system_prompt = context.render(node.config_str("system_prompt").unwrap_or(DEFAULT_SYSTEM_PROMPT));
        if let Some(instruction) = task.format_instruction() {
            system_prompt.push('\n');
            system_prompt.push_str(instruction);
        }
        let user_prompt = context.render(prompt);

        let completion = self
            .router
            .invoke_with_fallback(&Self::requirements(node), &system_prompt, &user_prompt)
            .await?;

        let mut output = json!({
            "content": completion.content,
            "provider": completion.provider,
            "model": completion.model,
            "attempts": completion.attempts,
        });
        if task != AiTask::Generate {
            let structured = StructuredOutput::from_content(task, &completion.content);
            output["result"] = structured.value;
            output["fallback"] = json!(structured.fallback);
        }

        Ok(NodeOutcome::success(output))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Linear backoff unit: the nth retry waits `retry_backoff * n`
    pub retry_backoff: Duration,
    pub max_delay: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(500),
            max_delay: Duration::from_secs(3600),
        }
    }
}

/// Node executor that dispatches through the handler table
pub struct NodeExecutor {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
    settings: ExecutorSettings,
}

impl NodeExecutor {
    /// Executor with no handlers; see `standard`
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            handlers: HashMap::new(),
            settings,
        }
    }

    /// Executor with a handler for every node type
    pub fn standard(router: Arc<AiProviderRouter>, actions: Arc<dyn ActionInvoker>, settings: ExecutorSettings) -> Self {
        let max_delay = settings.max_delay;
        Self::new(settings)
            .with_handler(NodeType::Trigger, Arc::new(TriggerHandler))
            .with_handler(NodeType::Action, Arc::new(ActionHandler::new(actions)))
            .with_handler(NodeType::Condition, Arc::new(ConditionHandler))
            .with_handler(NodeType::Delay, Arc::new(DelayHandler::new(max_delay)))
            .with_handler(NodeType::AI, Arc::new(AiHandler::new(router)))
    }

    /// Register or replace the handler for a node type
    pub fn with_handler(mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) -> Self {
        self.handlers.insert(node_type, handler);
        self
    }

    /// Execute a single node, retrying Action and AI failures with linear backoff
    ///
    /// Never returns an error: failures come back as a `Failed` run with the
    /// error message attached.
    pub async fn run(&self, node: &Node, context: &ExecutionContext) -> NodeRun {
        let start_time = Instant::now();
        let max_retries = node.max_retries();

        let Some(handler) = self.handlers.get(&node.node_type) else {
            let err = NodeExecutionError::NoHandler {
                node_type: node.node_type.as_str().to_string(),
            };
            tracing::error!("❌ {}", err);
            return NodeRun {
                status: NodeStatus::Failed,
                output: None,
                error: Some(err.to_string()),
                branch: None,
                retries: 0,
                duration: start_time.elapsed(),
            };
        };

        let mut retries = 0;
        loop {
            match handler.run(node, context).await {
                Ok(outcome) => {
                    let duration = start_time.elapsed();
                    tracing::info!("✅ Node execution completed: {} in {:?}", node.id, duration);
                    return NodeRun {
                        status: outcome.status,
                        output: Some(outcome.output),
                        error: None,
                        branch: outcome.branch,
                        retries,
                        duration,
                    };
                }
                Err(err) if retries < max_retries && err.is_retryable() => {
                    retries += 1;
                    let backoff = self.settings.retry_backoff * retries;
                    tracing::warn!("🔁 Node {} failed ({}), retry {}/{} in {:?}", node.id, err, retries, max_retries, backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    let duration = start_time.elapsed();
                    tracing::error!("❌ Node execution failed: {} in {:?} - Error: {}", node.id, duration, err);
                    return NodeRun {
                        status: NodeStatus::Failed,
                        output: None,
                        error: Some(err.to_string()),
                        branch: None,
                        retries,
                        duration,
                    };
                }
            }
        }
    }
}
