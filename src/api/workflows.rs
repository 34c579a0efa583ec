/// Workflow management REST API endpoints
///
/// Every create or update publishes a new immutable version: it is validated,
/// persisted, added to the registry and its schedule triggers are reloaded.
/// Runs already in flight keep the version they loaded.

use crate::api::{api_error, internal_error, ApiError, ApiResult, AppState};
use crate::workflow::{graph::WorkflowGraph, types::WorkflowDefinition};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Response for workflow creation/update operations
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub version: u32,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: WorkflowDefinition,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route("/api/workflows/{id}", get(get_workflow).put(update_workflow).delete(delete_workflow))
        .route("/api/workflows/{id}/versions/{version}", get(get_workflow_version))
}

/// 400 with the full error list when the graph is structurally invalid
fn validate_definition(workflow: &WorkflowDefinition) -> Result<(), ApiError> {
    if workflow.id.trim().is_empty() || workflow.name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow id and name are required"));
    }

    let errors = WorkflowGraph::new(workflow).validate_for_publish();
    if errors.is_empty() {
        return Ok(());
    }

    tracing::warn!("❌ Rejected invalid workflow {}: {} problem(s)", workflow.id, errors.len());
    let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
    Err((
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "workflow validation failed", "errors": errors })),
    ))
}

/// Persist the next version, then make it visible in the registry and scheduler
///
/// The version number is claimed by the insert itself; a concurrent publish
/// that got there first turns this one into a 409.
async fn publish_version(state: &AppState, mut workflow: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>, ApiError> {
    workflow.version = state.registry.latest_version(&workflow.id).map_or(1, |v| v + 1);

    let saved = state
        .storage
        .save_workflow_version(&workflow)
        .await
        .map_err(|e| internal_error("Failed to save workflow version", e))?;
    if !saved {
        tracing::warn!("⚠️ Version {} of workflow {} was published concurrently", workflow.version, workflow.id);
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("version {} of workflow '{}' was published concurrently, retry", workflow.version, workflow.id),
        ));
    }
    state.registry.insert_version(workflow.clone());

    if let Some(scheduler) = &state.scheduler {
        scheduler
            .add_or_update_workflow_triggers(&workflow)
            .await
            .map_err(|e| internal_error("Failed to register schedule triggers", e))?;
    }

    Ok(Arc::new(workflow))
}

/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "connections": [...], "triggers": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;
    validate_definition(&workflow)?;

    if state.registry.latest_version(&workflow.id).is_some() {
        return Err(api_error(StatusCode::CONFLICT, format!("workflow '{}' already exists", workflow.id)));
    }

    let published = publish_version(&state, workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({}) v{}", published.id, published.name, published.version);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id: published.id.clone(),
            version: published.version,
            message: format!("Workflow '{}' created successfully", published.name),
        }),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> ApiResult<Value> {
    let workflows = state
        .storage
        .list_workflows()
        .await
        .map_err(|e| internal_error("Failed to list workflows", e))?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id} (latest version)
async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<WorkflowDefinition> {
    state
        .registry
        .get(&id, None)
        .map(|workflow| Json(WorkflowDefinition::clone(&workflow)))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("workflow '{}' not found", id)))
}

/// GET /api/workflows/{id}/versions/{version}
async fn get_workflow_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, u32)>,
) -> ApiResult<WorkflowDefinition> {
    state
        .registry
        .get(&id, Some(version))
        .map(|workflow| Json(WorkflowDefinition::clone(&workflow)))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("workflow '{}' v{} not found", id, version)))
}

/// PUT /api/workflows/{id}
/// Publishes the body as a new version; the id in the path wins.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> ApiResult<WorkflowResponse> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    if state.registry.latest_version(&id).is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{}' not found", id)));
    }
    validate_definition(&workflow)?;

    let published = publish_version(&state, workflow).await?;
    tracing::info!("🔥 Hot-reloaded workflow: {} ({}) v{}", published.id, published.name, published.version);

    Ok(Json(WorkflowResponse {
        id: published.id.clone(),
        version: published.version,
        message: format!("Workflow '{}' updated successfully", published.name),
    }))
}

/// DELETE /api/workflows/{id}
/// Removes every version; execution history is kept.
async fn delete_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    if let Some(scheduler) = &state.scheduler {
        scheduler.remove_workflow_triggers(&id).await;
    }

    let in_registry = state.registry.remove(&id);
    let in_storage = state
        .storage
        .delete_workflow(&id)
        .await
        .map_err(|e| internal_error("Failed to delete workflow", e))?;

    if !in_registry && !in_storage {
        return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{}' not found", id)));
    }

    tracing::info!("🗑️ Deleted workflow: {}", id);
    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}
