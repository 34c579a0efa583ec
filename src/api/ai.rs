/// Ad-hoc AI requests
///
/// Runs one prompt through the provider router outside of any workflow,
/// e.g. a one-off sentiment or classification call.

use crate::ai::{AiTask, Requirements, StructuredOutput};
use crate::api::{api_error, ApiResult, AppState};
use crate::error::ProviderError;
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Deserialize)]
pub struct AiRequestBody {
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub task: AiTask,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AiResponseBody {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

pub fn create_ai_routes() -> Router<AppState> {
    Router::new().route("/api/ai/request", post(ai_request))
}

/// POST /api/ai/request
async fn ai_request(State(state): State<AppState>, Json(body): Json<AiRequestBody>) -> ApiResult<AiResponseBody> {
    if body.prompt.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "prompt must not be empty"));
    }

    let mut system_prompt = body.system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    if let Some(instruction) = body.task.format_instruction() {
        system_prompt.push('\n');
        system_prompt.push_str(instruction);
    }

    let completion = state
        .router
        .invoke_with_fallback(&body.requirements, &system_prompt, &body.prompt)
        .await
        .map_err(|e| match e {
            ProviderError::AllProvidersExhausted { .. } => {
                tracing::error!("❌ AI request failed: {}", e);
                api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            other => api_error(StatusCode::BAD_GATEWAY, other.to_string()),
        })?;

    let structured = (body.task != AiTask::Generate).then(|| {
        let output = StructuredOutput::from_content(body.task, &completion.content);
        serde_json::json!({ "value": output.value, "fallback": output.fallback })
    });

    Ok(Json(AiResponseBody {
        content: completion.content,
        provider: completion.provider,
        model: completion.model,
        attempts: completion.attempts,
        structured,
    }))
}
