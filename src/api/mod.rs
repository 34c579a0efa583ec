/// HTTP API Layer
///
/// This module provides the REST API endpoints for workflow management,
/// execution control, ad-hoc AI requests and webhook triggers. It handles:
/// - Versioned workflow CRUD operations
/// - Idempotent execution triggering, status and cancellation
/// - AI requests routed across providers
/// - Webhook-triggered runs

use crate::ai::AiProviderRouter;
use crate::runtime::{engine::ExecutionCoordinator, scheduler::CronSchedulerService};
use crate::workflow::{registry::WorkflowRegistry, storage::SqliteStore};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Execute, status and cancel
pub mod executions;

// Ad-hoc AI requests
pub mod ai;

// Webhook trigger endpoint
pub mod webhooks;

/// Shared resources for every handler
#[derive(Clone)]
pub struct AppState {
    /// Persistence for workflow versions
    pub storage: SqliteStore,
    /// Lock-free registry of published workflow versions
    pub registry: Arc<WorkflowRegistry>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub router: Arc<AiProviderRouter>,
    /// Absent when cron scheduling is disabled
    pub scheduler: Option<Arc<CronSchedulerService>>,
}

/// Error half of handler results: status plus a JSON body
pub type ApiError = (StatusCode, Json<Value>);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub(crate) fn internal_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    tracing::error!("❌ {}: {}", context, err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// All routes with state applied
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(workflows::create_workflow_routes())
        .merge(executions::create_execution_routes())
        .merge(ai::create_ai_routes())
        .merge(webhooks::create_webhook_routes())
        .with_state(state)
}

/// Simple health check that returns "ok"
async fn health_check() -> &'static str {
    "ok"
}
