/// Workflow Management Layer
///
/// Workflow definitions, their graph model, and where they live:
/// - Type definitions (WorkflowDefinition, Node, Connection, Trigger)
/// - Graph validation and deterministic topological ordering
/// - Lock-free versioned registry using ArcSwap
/// - SQLite persistence with sqlx

// Core workflow type definitions
pub mod types;

// Graph validation and ordering over petgraph
pub mod graph;

// Versioned in-memory registry
pub mod registry;

// SQLite persistence for workflow versions and execution records
pub mod storage;

// Re-export commonly used types
pub use graph::WorkflowGraph;
pub use registry::{WorkflowRegistry, WorkflowStore};
pub use storage::SqliteStore;
pub use types::{
    Connection, ExecutionContext, FailurePolicy, Node, NodeType, Trigger, TriggerKind, WorkflowDefinition,
};
