/// Structured AI output parsing
///
/// Classification-style tasks ask the model for JSON. Models do not always
/// comply, so parsing returns a typed error and `StructuredOutput` applies a
/// conservative per-task default instead of failing the node.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// What an AI node is asking the model to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiTask {
    /// Free text, no parsing
    #[default]
    Generate,
    /// `{"sentiment": "...", "confidence": 0.0-1.0}`
    Sentiment,
    /// `{"category": "...", "confidence": 0.0-1.0}`
    Classify,
    /// `{"entities": [...]}`
    Extract,
}

impl AiTask {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "generate" => Some(Self::Generate),
            "sentiment" => Some(Self::Sentiment),
            "classify" => Some(Self::Classify),
            "extract" => Some(Self::Extract),
            _ => None,
        }
    }

    /// Key that must be present for the output to count as parsed
    fn required_key(self) -> Option<&'static str> {
        match self {
            Self::Generate => None,
            Self::Sentiment => Some("sentiment"),
            Self::Classify => Some("category"),
            Self::Extract => Some("entities"),
        }
    }

    /// Low-confidence value used when the model's output cannot be parsed
    pub fn fallback_value(self) -> Value {
        match self {
            Self::Generate => Value::Null,
            Self::Sentiment => json!({"sentiment": "neutral", "confidence": 0.5}),
            Self::Classify => json!({"category": "unknown", "confidence": 0.0}),
            Self::Extract => json!({"entities": []}),
        }
    }

    /// Instruction appended to the system prompt for structured tasks
    pub fn format_instruction(self) -> Option<&'static str> {
        match self {
            Self::Generate => None,
            Self::Sentiment => Some(
                "Respond only with JSON of the form {\"sentiment\": \"positive|negative|neutral\", \"confidence\": <0..1>}.",
            ),
            Self::Classify => Some("Respond only with JSON of the form {\"category\": \"<label>\", \"confidence\": <0..1>}."),
            Self::Extract => Some("Respond only with JSON of the form {\"entities\": [ ... ]}."),
        }
    }
}

/// Pull a JSON object out of model output
///
/// Accepts raw JSON, a fenced code block, or the outermost `{...}` span.
fn extract_json(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        if let Some(fence_end) = body.find("```") {
            let inner = body[..fence_end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse model output for `task`
pub fn parse_structured(task: AiTask, content: &str) -> Result<Value, ParseError> {
    let Some(required) = task.required_key() else {
        return Ok(Value::String(content.to_string()));
    };

    let raw = extract_json(content).ok_or_else(|| ParseError {
        reason: "no JSON object found".to_string(),
    })?;
    let value: Value = serde_json::from_str(raw).map_err(|e| ParseError { reason: e.to_string() })?;

    match value.get(required) {
        Some(_) => Ok(value),
        None => Err(ParseError {
            reason: format!("missing required key '{}'", required),
        }),
    }
}

/// Parsed output, or the task's fallback value with the parse error attached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredOutput {
    pub task: AiTask,
    pub value: Value,
    /// True when `value` is the low-confidence default
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StructuredOutput {
    pub fn from_content(task: AiTask, content: &str) -> Self {
        match parse_structured(task, content) {
            Ok(value) => Self {
                task,
                value,
                fallback: false,
                error: None,
            },
            Err(err) => {
                tracing::warn!("⚠️ Using low-confidence default for {:?} output: {}", task, err);
                Self {
                    task,
                    value: task.fallback_value(),
                    fallback: true,
                    error: Some(err.reason),
                }
            }
        }
    }
}
