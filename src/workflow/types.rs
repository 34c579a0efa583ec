/// Core workflow type definitions
///
/// Defines workflows, nodes, connections and triggers. These types are
/// serialized as JSON for persistence and the HTTP API. A definition is
/// immutable once published under a version number.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// A complete, versioned workflow definition
///
/// `nodes` keeps declaration order; the engine relies on it to break
/// ties in the topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g., "wf-onboarding")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Nodes in declaration order
    pub nodes: Vec<Node>,
    /// Directed connections between nodes
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Entry points that can start a run
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Version counter, assigned by the registry on publish
    #[serde(default)]
    pub version: u32,
}

impl WorkflowDefinition {
    /// Find the trigger bound to a webhook path; leading slashes are ignored
    pub fn webhook_trigger(&self, path: &str) -> Option<&Trigger> {
        let path = path.trim_start_matches('/');
        self.triggers.iter().find(|trigger| match &trigger.kind {
            TriggerKind::Webhook { path: trigger_path } => trigger_path.trim_start_matches('/') == path,
            _ => false,
        })
    }
}

/// A single step in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "t1", "notify")
    pub id: String,
    /// Determines which handler executes the node
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Handler-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Editor position, ignored by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type,
            config: Map::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    /// What the coordinator does when this node fails (config key `on_failure`)
    pub fn failure_policy(&self) -> FailurePolicy {
        match self.config.get("on_failure").and_then(Value::as_str) {
            Some("continue") => FailurePolicy::Continue,
            _ => FailurePolicy::Abort,
        }
    }

    /// Retries after the first attempt; only Action and AI nodes are retried
    pub fn max_retries(&self) -> u32 {
        if !self.node_type.is_retryable() {
            return 0;
        }
        self.config
            .get("max_retries")
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Display-only editor coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Node kinds understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Entry point; outputs the run payload
    Trigger,
    /// Side-effecting operation, e.g. `{ "action": "http_request", "url": "..." }`
    Action,
    /// Predicate that selects one outgoing branch, e.g. `{ "path": "$.payload.score", "operator": "greater_than", "value": 50 }`
    Condition,
    /// Suspends the run, e.g. `{ "seconds": 5 }`
    Delay,
    /// Language-model call routed across providers, e.g. `{ "prompt": "...", "task": "sentiment" }`
    #[serde(rename = "ai")]
    AI,
}

impl NodeType {
    pub fn is_retryable(self) -> bool {
        matches!(self, NodeType::Action | NodeType::AI)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Trigger => "trigger",
            NodeType::Action => "action",
            NodeType::Condition => "condition",
            NodeType::Delay => "delay",
            NodeType::AI => "ai",
        }
    }
}

/// How a node failure affects the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the run and mark it Failed
    Abort,
    /// Record the failure and keep going; the run ends Recovered
    Continue,
}

/// Directed edge between two nodes
///
/// `branch` is only meaningful on edges leaving a Condition node: the edge is
/// followed when the condition selects that label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Connection {
    pub fn new(from_node: impl Into<String>, to_node: impl Into<String>) -> Self {
        let from_node = from_node.into();
        let to_node = to_node.into();
        Self {
            id: format!("{}->{}", from_node, to_node),
            from_node,
            to_node,
            branch: None,
        }
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// An entry point bound to a Trigger node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub node_id: String,
    #[serde(flatten)]
    pub kind: TriggerKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Started through the execute API
    Manual,
    /// Started by `POST /webhook/{workflow_id}/{path}`
    Webhook { path: String },
    /// Started by the cron scheduler, six-field cron expression
    Schedule { cron: String },
}

/// Runtime context handed to node handlers
///
/// Holds the run payload and the outputs of nodes that already executed,
/// keyed by node id. Handlers only read it; the coordinator records outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: Uuid,
    /// Payload the run was started with (webhook body, API payload, cron tick)
    pub payload: Value,
    /// Outputs of executed upstream nodes
    pub outputs: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, execution_id: Uuid, payload: Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            payload,
            outputs: HashMap::new(),
        }
    }

    /// JSON view used for path lookups: `{"payload": ..., "nodes": {...}}`
    pub fn to_json(&self) -> Value {
        let nodes: Map<String, Value> = self
            .outputs
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();
        serde_json::json!({
            "workflow_id": self.workflow_id,
            "execution_id": self.execution_id.to_string(),
            "payload": self.payload,
            "nodes": Value::Object(nodes),
        })
    }

    /// Replace `{{path}}` placeholders with values from the context
    ///
    /// Strings are inserted verbatim, other values as compact JSON. Unknown
    /// paths render as empty strings; an unterminated `{{` is left as-is.
    pub fn render(&self, template: &str) -> String {
        let root = self.to_json();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let path = after[..end].trim();
                    match lookup_path(&root, path) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(Value::Null) | None => {}
                        Some(other) => out.push_str(&other.to_string()),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Walk a dot-separated path through objects (and numeric array indices)
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("wf", Uuid::nil(), json!({"user": {"name": "Ada"}}));
        ctx.outputs.insert("fetch".into(), json!({"status": 200, "items": [1, 2]}));
        ctx
    }

    #[test]
    fn render_substitutes_strings_and_json() {
        let ctx = context();
        let rendered = ctx.render("Hi {{payload.user.name}}, got {{ nodes.fetch.status }} {{nodes.fetch.items}}");
        assert_eq!(rendered, "Hi Ada, got 200 [1,2]");
    }

    #[test]
    fn render_leaves_unknown_paths_empty_and_unterminated_braces() {
        let ctx = context();
        assert_eq!(ctx.render("[{{nodes.missing}}]"), "[]");
        assert_eq!(ctx.render("open {{payload"), "open {{payload");
    }

    #[test]
    fn lookup_walks_arrays() {
        let ctx = context();
        let root = ctx.to_json();
        assert_eq!(lookup_path(&root, "nodes.fetch.items.1"), Some(&json!(2)));
        assert_eq!(lookup_path(&root, "nodes.fetch.items.9"), None);
    }

    #[test]
    fn node_policies_from_config() {
        let action = Node::new("a", NodeType::Action)
            .with_config("max_retries", json!(2))
            .with_config("on_failure", json!("continue"));
        assert_eq!(action.max_retries(), 2);
        assert_eq!(action.failure_policy(), FailurePolicy::Continue);

        let condition = Node::new("c", NodeType::Condition).with_config("max_retries", json!(5));
        assert_eq!(condition.max_retries(), 0);
        assert_eq!(condition.failure_policy(), FailurePolicy::Abort);
    }

    #[test]
    fn definition_deserializes_with_tagged_triggers() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "name": "Demo",
            "nodes": [
                {"id": "t", "type": "trigger"},
                {"id": "ai1", "type": "ai", "config": {"prompt": "hello"}}
            ],
            "connections": [{"id": "c1", "from_node": "t", "to_node": "ai1"}],
            "triggers": [{"id": "hook", "node_id": "t", "kind": "webhook", "path": "/in"}]
        }))
        .unwrap();

        assert_eq!(def.nodes[1].node_type, NodeType::AI);
        assert_eq!(def.version, 0);
        assert_eq!(def.webhook_trigger("/in").map(|t| t.id.as_str()), Some("hook"));
    }
}
