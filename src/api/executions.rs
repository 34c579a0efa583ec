/// Execution endpoints
///
/// Starting a run is idempotent per `idempotency_key`: a repeated key within
/// its lifetime returns the original execution id with `deduplicated: true`.

use crate::api::{api_error, internal_error, ApiResult, AppState};
use crate::runtime::engine::ExecuteRequest;
use crate::runtime::record::{ExecutionRecord, ExecutionStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Body of `POST /api/workflows/{id}/execute`; every field is optional
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub start_node: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    /// Block until the run finishes
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub deduplicated: bool,
    /// Full record, only when the caller waited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<ExecutionRecord>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
}

/// POST /api/workflows/{id}/execute
async fn execute_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: String,
) -> ApiResult<ExecuteResponse> {
    let body: ExecuteBody = if body.trim().is_empty() {
        ExecuteBody::default()
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid execute body for {}: {}", workflow_id, e);
            api_error(StatusCode::BAD_REQUEST, format!("invalid request body: {}", e))
        })?
    };

    if state.registry.get(&workflow_id, body.version).is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{}' not found", workflow_id)));
    }

    let request = ExecuteRequest {
        workflow_id,
        version: body.version,
        idempotency_key: body.idempotency_key,
        start_node: body.start_node,
        payload: body.payload,
    };

    let dispatch = if body.wait {
        state.coordinator.execute_tracked(request).await
    } else {
        state.coordinator.submit(request).await
    };

    Ok(Json(ExecuteResponse {
        execution_id: dispatch.record.id,
        status: dispatch.record.status,
        deduplicated: dispatch.deduplicated,
        record: body.wait.then_some(dispatch.record),
    }))
}

/// GET /api/executions/{id}
async fn get_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ExecutionRecord> {
    match state.coordinator.status(id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("execution {} not found", id))),
        Err(e) => Err(internal_error("Failed to load execution", e)),
    }
}

/// POST /api/executions/{id}/cancel
async fn cancel_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    if state.coordinator.cancel(id) {
        return Ok(Json(json!({ "execution_id": id, "cancelled": true })));
    }

    match state.coordinator.status(id).await {
        Ok(Some(record)) => Err(api_error(
            StatusCode::CONFLICT,
            format!("execution {} already finished with status {}", id, record.status.as_str()),
        )),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("execution {} not found", id))),
        Err(e) => Err(internal_error("Failed to load execution", e)),
    }
}
