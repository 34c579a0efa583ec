// Shared helpers for integration tests: a workflow builder, a counting
// action invoker and a scripted provider transport.

#![allow(dead_code)]

use async_trait::async_trait;
use relayflow::ai::adapter::{AdapterTable, ProviderRequest};
use relayflow::ai::profile::{ModelSpec, ProviderProfile, SpeedClass};
use relayflow::ai::transport::{ProviderTransport, TransportError};
use relayflow::ai::{AiProviderRouter, RouterSettings};
use relayflow::error::NodeExecutionError;
use relayflow::runtime::actions::ActionInvoker;
use relayflow::runtime::engine::{CoordinatorSettings, ExecutionCoordinator};
use relayflow::runtime::executor::{ExecutorSettings, NodeExecutor};
use relayflow::runtime::idempotency::IdempotencyStore;
use relayflow::runtime::record::{ExecutionRecord, ExecutionStore, MemoryExecutionStore};
use relayflow::workflow::registry::WorkflowRegistry;
use relayflow::workflow::types::{Connection, Node, NodeType, Trigger, TriggerKind, WorkflowDefinition};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub struct WorkflowBuilder {
    id: String,
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    triggers: Vec<Trigger>,
}

impl WorkflowBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            nodes: Vec::new(),
            connections: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn trigger(self, id: &str) -> Self {
        self.node(Node::new(id, NodeType::Trigger))
    }

    pub fn action(self, id: &str) -> Self {
        self.node(Node::new(id, NodeType::Action).with_config("action", json!(id)))
    }

    pub fn ai(self, id: &str, prompt: &str) -> Self {
        self.node(Node::new(id, NodeType::AI).with_config("prompt", json!(prompt)))
    }

    pub fn condition(self, id: &str, path: &str, operator: &str, value: Value) -> Self {
        self.node(
            Node::new(id, NodeType::Condition)
                .with_config("path", json!(path))
                .with_config("operator", json!(operator))
                .with_config("value", value),
        )
    }

    pub fn delay_ms(self, id: &str, milliseconds: u64) -> Self {
        self.node(Node::new(id, NodeType::Delay).with_config("milliseconds", json!(milliseconds)))
    }

    pub fn connect(mut self, from: &str, to: &str) -> Self {
        self.connections.push(Connection::new(from, to));
        self
    }

    pub fn branch(mut self, from: &str, to: &str, label: &str) -> Self {
        self.connections.push(Connection::new(from, to).on_branch(label));
        self
    }

    pub fn webhook(mut self, node_id: &str, path: &str) -> Self {
        self.triggers.push(Trigger {
            id: format!("{}-hook", node_id),
            node_id: node_id.to_string(),
            kind: TriggerKind::Webhook { path: path.to_string() },
        });
        self
    }

    pub fn schedule(mut self, node_id: &str, cron: &str) -> Self {
        self.triggers.push(Trigger {
            id: format!("{}-cron", node_id),
            node_id: node_id.to_string(),
            kind: TriggerKind::Schedule { cron: cron.to_string() },
        });
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: format!("Test workflow: {}", self.id),
            id: self.id,
            nodes: self.nodes,
            connections: self.connections,
            triggers: self.triggers,
            version: 0,
        }
    }
}

/// Records every invocation; actions named in `failing` fail their first N calls
#[derive(Default)]
pub struct CountingActions {
    calls: Mutex<HashMap<String, u32>>,
    failing: Mutex<HashMap<String, u32>>,
}

impl CountingActions {
    pub fn fail(&self, action: &str, times: u32) {
        self.failing.lock().unwrap().insert(action.to_string(), times);
    }

    pub fn calls(&self, action: &str) -> u32 {
        self.calls.lock().unwrap().get(action).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ActionInvoker for CountingActions {
    async fn invoke(&self, action: &str, node: &Node, _context: &relayflow::workflow::ExecutionContext) -> Result<Value, NodeExecutionError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(action.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let mut failing = self.failing.lock().unwrap();
        if let Some(remaining) = failing.get_mut(action) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NodeExecutionError::ActionFailed {
                    action: action.to_string(),
                    reason: format!("scripted failure on call {}", call),
                });
            }
        }

        Ok(node.config.get("value").cloned().unwrap_or_else(|| json!({ "action": action, "call": call })))
    }
}

/// Answers every provider in its own response shape; hosts in `down` fail with 503
#[derive(Default)]
pub struct ScriptedTransport {
    pub reply: Mutex<String>,
    pub down: Mutex<HashSet<String>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedTransport {
    pub fn replying(reply: &str) -> Arc<Self> {
        let transport = Self::default();
        *transport.reply.lock().unwrap() = reply.to_string();
        Arc::new(transport)
    }

    pub fn take_down(&self, host: &str) {
        self.down.lock().unwrap().insert(host.to_string());
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderTransport for ScriptedTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<Value, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.down.lock().unwrap().iter().any(|host| request.url.contains(host.as_str())) {
            return Err(TransportError::Status {
                status: 503,
                body: "provider down".to_string(),
            });
        }

        let reply = self.reply.lock().unwrap().clone();
        Ok(json!({
            "choices": [{"message": {"content": reply}}],
            "content": [{"type": "text", "text": reply}],
        }))
    }
}

/// groq (fast, cheap) and anthropic (standard) with credentials
pub fn test_profiles() -> Vec<ProviderProfile> {
    vec![
        ProviderProfile::new(
            "groq",
            "https://groq.test/openai/v1",
            SpeedClass::Fast,
            vec![ModelSpec::new("llama-3.3-70b-versatile", 131_072, 0.0008)],
        )
        .with_api_key("gsk-test"),
        ProviderProfile::new(
            "anthropic",
            "https://anthropic.test",
            SpeedClass::Standard,
            vec![ModelSpec::new("claude-3-5-sonnet-20241022", 200_000, 0.003)],
        )
        .with_api_key("sk-ant-test"),
    ]
}

pub fn test_router(transport: Arc<ScriptedTransport>) -> Arc<AiProviderRouter> {
    Arc::new(AiProviderRouter::new(
        test_profiles(),
        AdapterTable::standard(),
        transport,
        RouterSettings::default(),
    ))
}

/// Coordinator over in-memory stores with counting actions and a scripted transport
pub struct Harness {
    pub registry: Arc<WorkflowRegistry>,
    pub executions: Arc<MemoryExecutionStore>,
    pub actions: Arc<CountingActions>,
    pub transport: Arc<ScriptedTransport>,
    pub coordinator: Arc<ExecutionCoordinator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(CoordinatorSettings::default())
    }

    pub fn with_settings(settings: CoordinatorSettings) -> Self {
        let executions = Arc::new(MemoryExecutionStore::new());
        let (registry, actions, transport, coordinator) =
            assemble(Arc::clone(&executions) as Arc<dyn ExecutionStore>, settings);

        Self {
            registry,
            executions,
            actions,
            transport,
            coordinator,
        }
    }

    /// Poll until the execution reaches a terminal status
    pub async fn wait_for(&self, execution_id: Uuid) -> ExecutionRecord {
        for _ in 0..500 {
            if let Ok(Some(record)) = self.coordinator.status(execution_id).await {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {} did not finish", execution_id);
    }
}

/// Wire a coordinator over the given execution store
pub fn assemble(
    executions: Arc<dyn ExecutionStore>,
    settings: CoordinatorSettings,
) -> (Arc<WorkflowRegistry>, Arc<CountingActions>, Arc<ScriptedTransport>, Arc<ExecutionCoordinator>) {
    let registry = Arc::new(WorkflowRegistry::new());
    let actions = Arc::new(CountingActions::default());
    let transport = ScriptedTransport::replying("ok");

    let executor = NodeExecutor::standard(
        test_router(Arc::clone(&transport)),
        Arc::clone(&actions) as Arc<dyn ActionInvoker>,
        ExecutorSettings {
            retry_backoff: Duration::from_millis(1),
            max_delay: Duration::from_secs(5),
        },
    );

    let coordinator = Arc::new(ExecutionCoordinator::new(
        Arc::clone(&registry) as Arc<dyn relayflow::workflow::WorkflowStore>,
        executions,
        Arc::new(executor),
        Arc::new(IdempotencyStore::new()),
        settings,
    ));

    (registry, actions, transport, coordinator)
}

/// Execution store whose writes always fail
pub struct BrokenStore;

#[async_trait]
impl ExecutionStore for BrokenStore {
    async fn save_execution_record(&self, _record: &ExecutionRecord) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn get_execution_record(&self, _id: Uuid) -> anyhow::Result<Option<ExecutionRecord>> {
        Ok(None)
    }
}
