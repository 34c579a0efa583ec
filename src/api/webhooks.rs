/// Webhook trigger endpoint
///
/// Resolves the webhook trigger by path and starts a run at its node with
/// the JSON body as payload. The `Idempotency-Key` header, when present,
/// deduplicates retried deliveries.

use crate::api::executions::ExecuteResponse;
use crate::api::{api_error, ApiError, AppState};
use crate::runtime::engine::ExecuteRequest;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde_json::Value;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub fn create_webhook_routes() -> Router<AppState> {
    // Format: /webhook/{workflow_id}/{webhook_path}
    Router::new().route("/webhook/{workflow_id}/{*path}", post(execute_webhook))
}

/// POST /webhook/{workflow_id}/{webhook_path}
async fn execute_webhook(
    State(state): State<AppState>,
    Path((workflow_id, webhook_path)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    tracing::info!("📥 Webhook request received: {}/{}", workflow_id, webhook_path);

    let payload: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid JSON payload for webhook: {}/{} - Error: {}", workflow_id, webhook_path, e);
            api_error(StatusCode::BAD_REQUEST, format!("invalid JSON payload: {}", e))
        })?
    };

    let workflow = state.registry.get(&workflow_id, None).ok_or_else(|| {
        tracing::warn!("❌ Webhook called for unknown workflow: {}", workflow_id);
        api_error(StatusCode::NOT_FOUND, format!("workflow '{}' not found", workflow_id))
    })?;

    let trigger = workflow.webhook_trigger(&webhook_path).ok_or_else(|| {
        tracing::warn!("❌ No webhook trigger for path '{}' in workflow {}", webhook_path, workflow_id);
        api_error(StatusCode::NOT_FOUND, format!("no webhook trigger for path '{}'", webhook_path))
    })?;

    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string);

    let mut request = ExecuteRequest::new(&workflow_id)
        .at_version(workflow.version)
        .starting_at(trigger.node_id.clone())
        .with_payload(payload);
    request.idempotency_key = idempotency_key;

    let dispatch = state.coordinator.submit(request).await;
    tracing::info!("🚀 Webhook {} -> execution {} (deduplicated: {})", webhook_path, dispatch.record.id, dispatch.deduplicated);

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id: dispatch.record.id,
            status: dispatch.record.status,
            deduplicated: dispatch.deduplicated,
            record: None,
        }),
    ))
}
