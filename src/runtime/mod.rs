/// Runtime Execution Engine
///
/// This module runs workflows:
/// - At-most-once dispatch per idempotency key
/// - Topological execution of nodes with branch skipping
/// - Per-node handlers with retry policy
/// - Execution records and their persistence contract
/// - Cron-driven runs for schedule triggers

// Execution records, log entries and the execution store contract
pub mod record;

// (workflow, key) -> execution id with bounded lifetime
pub mod idempotency;

// Condition predicates
pub mod condition;

// Action node side effects
pub mod actions;

// Individual node execution handlers
pub mod executor;

// Run orchestration: the execution coordinator
pub mod engine;

// Background cron scheduler service for schedule triggers
pub mod scheduler;

pub use actions::{ActionInvoker, BuiltinActions};
pub use engine::{CoordinatorSettings, Dispatch, ExecuteRequest, ExecutionCoordinator};
pub use executor::{ExecutorSettings, NodeExecutor, NodeHandler, NodeOutcome, NodeRun};
pub use idempotency::{Acquisition, IdempotencyStore};
pub use record::{ExecutionRecord, ExecutionStatus, ExecutionStore, LogEntry, MemoryExecutionStore, NodeStatus};
pub use scheduler::CronSchedulerService;
