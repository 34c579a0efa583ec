/// Error taxonomy for the execution engine
///
/// Graph problems, provider failures and node failures each get their own type so
/// the coordinator can decide containment at the right boundary:
/// - ValidationError: structural graph problems, the run fails before any node executes
/// - ProviderError: a single provider call failed, or the whole fallback chain did
/// - NodeExecutionError: a handler failed, subject to the node's retry/failure policy
/// - ParseError: AI output that does not match the expected structured shape

use thiserror::Error;

/// A cycle found in the non-branching part of a workflow graph
///
/// `node_ids` lists the nodes on the cycle in traversal order, starting and
/// ending with the node the back-edge points to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("workflow graph contains a cycle: {}", node_ids.join(" -> "))]
pub struct CyclicGraphError {
    pub node_ids: Vec<String>,
}

/// Structural problems reported by `WorkflowGraph::validate`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate node id: {node_id}")]
    DuplicateNodeId { node_id: String },

    #[error("connection {connection_id} references unknown node: {node_id}")]
    UnknownEndpoint { connection_id: String, node_id: String },

    #[error("trigger {trigger_id} references unknown or non-trigger node: {node_id}")]
    InvalidTrigger { trigger_id: String, node_id: String },

    #[error("workflow has no trigger node and no explicit start node")]
    MissingTrigger,

    #[error("workflow has multiple trigger nodes ({}) and no explicit start node", node_ids.join(", "))]
    MultipleTriggers { node_ids: Vec<String> },

    #[error("start node not found: {node_id}")]
    UnknownStartNode { node_id: String },

    #[error(transparent)]
    Cycle(#[from] CyclicGraphError),
}

/// Failures from the AI provider routing layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// One (provider, model) call failed: transport error, timeout, non-2xx or malformed payload
    #[error("provider {provider}/{model} unavailable: {reason}")]
    Unavailable {
        provider: String,
        model: String,
        reason: String,
    },

    /// Every attempt in the fallback chain failed
    #[error("all providers exhausted after {attempts} attempt(s): {last}")]
    AllProvidersExhausted {
        attempts: usize,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn unavailable(provider: &str, model: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.to_string(),
            model: model.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures raised while executing a single node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeExecutionError {
    #[error("node {node_id}: missing config key '{key}'")]
    MissingConfig { node_id: String, key: String },

    #[error("node {node_id}: invalid config: {reason}")]
    InvalidConfig { node_id: String, reason: String },

    #[error("no handler registered for node type {node_type}")]
    NoHandler { node_type: String },

    #[error("unknown action: {action}")]
    UnknownAction { action: String },

    #[error("action {action} failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl NodeExecutionError {
    /// Configuration mistakes fail the same way on every attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ActionFailed { .. } | Self::Provider(_))
    }
}

/// Structured AI output could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to parse AI output: {reason}")]
pub struct ParseError {
    pub reason: String,
}
