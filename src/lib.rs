/// RelayFlow: workflow execution engine with multi-provider AI routing
///
/// This library provides graph validation with deterministic ordering,
/// idempotent run dispatch, a per-node execution state machine with retry
/// and failure policies, and cost/speed-aware routing across AI providers
/// with a bounded fallback chain.

// Core configuration and setup
pub mod config;

// Typed error taxonomy
pub mod error;

// Workflow management layer - definitions, graph model, registry, storage
pub mod workflow;

// Runtime execution engine - coordinator, node executor, idempotency
pub mod runtime;

// AI provider routing - profiles, adapters, selection and fallback
pub mod ai;

// HTTP API layer - REST endpoints for workflows, executions, AI and webhooks
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use ai::{AiProviderRouter, Requirements};
pub use error::{CyclicGraphError, NodeExecutionError, ParseError, ProviderError, ValidationError};
pub use runtime::{ExecuteRequest, ExecutionCoordinator, ExecutionRecord, ExecutionStatus, IdempotencyStore, NodeExecutor};
pub use server::start_server;
pub use workflow::{Connection, Node, NodeType, WorkflowDefinition, WorkflowGraph, WorkflowRegistry};
