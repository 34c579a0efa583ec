/// Action node side effects
///
/// Action nodes name an operation in `config.action`. The executor hands the
/// node to an `ActionInvoker`, which is the seam for integrations. The
/// built-in invoker covers outbound HTTP plus two utility actions:
/// - http_request: reqwest call with rendered url, headers and body
/// - set: returns the configured `value` (rendered when it is a string)
/// - log: writes `message` to the tracing log

use crate::error::NodeExecutionError;
use crate::workflow::types::{ExecutionContext, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(&self, action: &str, node: &Node, context: &ExecutionContext) -> Result<Value, NodeExecutionError>;
}

/// Render `{{path}}` placeholders in every string leaf of `value`
pub fn render_value(value: &Value, context: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => Value::String(context.render(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, context)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), render_value(v, context))).collect()),
        other => other.clone(),
    }
}

/// Built-in actions backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct BuiltinActions {
    client: reqwest::Client,
}

impl BuiltinActions {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }

    async fn http_request(&self, node: &Node, context: &ExecutionContext) -> Result<Value, NodeExecutionError> {
        let failed = |reason: String| NodeExecutionError::ActionFailed {
            action: "http_request".to_string(),
            reason,
        };

        let url = node.config_str("url").map(|u| context.render(u)).ok_or_else(|| NodeExecutionError::MissingConfig {
            node_id: node.id.clone(),
            key: "url".to_string(),
        })?;
        let method = node.config_str("method").unwrap_or("GET").to_uppercase();
        let headers = node.config.get("headers").and_then(Value::as_object).cloned().unwrap_or_default();

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request_builder = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            "PATCH" => self.client.patch(&url),
            _ => {
                return Err(NodeExecutionError::InvalidConfig {
                    node_id: node.id.clone(),
                    reason: format!("unsupported HTTP method: {}", method),
                })
            }
        };

        for (key, value) in headers {
            if let Some(header_value) = value.as_str() {
                request_builder = request_builder.header(key.as_str(), context.render(header_value));
            }
        }

        if let Some(body) = node.config.get("body") {
            match render_value(body, context) {
                Value::String(text) => {
                    request_builder = request_builder.header("Content-Type", "text/plain").body(text);
                }
                other => {
                    request_builder = request_builder.json(&other);
                }
            }
        }

        let response = request_builder.send().await.map_err(|e| failed(format!("request failed: {}", e)))?;

        let status = response.status();
        let headers_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let response_text = response
            .text()
            .await
            .map_err(|e| failed(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let body: String = response_text.chars().take(500).collect();
            return Err(failed(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let data = serde_json::from_str::<Value>(&response_text).unwrap_or(Value::String(response_text));
        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers_map,
            "data": data,
        }))
    }
}

#[async_trait]
impl ActionInvoker for BuiltinActions {
    async fn invoke(&self, action: &str, node: &Node, context: &ExecutionContext) -> Result<Value, NodeExecutionError> {
        match action {
            "http_request" => self.http_request(node, context).await,
            "set" => Ok(node.config.get("value").map(|v| render_value(v, context)).unwrap_or(Value::Null)),
            "log" => {
                let message = context.render(node.config_str("message").unwrap_or_default());
                tracing::info!("📝 [{}] {}", node.id, message);
                Ok(json!({ "message": message }))
            }
            other => Err(NodeExecutionError::UnknownAction {
                action: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::NodeType;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("wf", Uuid::nil(), json!({"user": "ada", "token": "t-1"}));
        ctx.outputs.insert("prev".into(), json!({"id": 7}));
        ctx
    }

    fn actions() -> BuiltinActions {
        BuiltinActions::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn http_request_renders_and_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/7"))
            .and(header("authorization", "Bearer t-1"))
            .and(body_json(json!({"name": "ada"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"created": true})))
            .expect(1)
            .mount(&server)
            .await;

        let node = Node::new("call", NodeType::Action)
            .with_config("action", json!("http_request"))
            .with_config("method", json!("post"))
            .with_config("url", json!(format!("{}/users/{{{{nodes.prev.id}}}}", server.uri())))
            .with_config("headers", json!({"authorization": "Bearer {{payload.token}}"}))
            .with_config("body", json!({"name": "{{payload.user}}"}));

        let output = actions().invoke("http_request", &node, &context()).await.unwrap();
        assert_eq!(output["status"], 201);
        assert_eq!(output["data"]["created"], true);
    }

    #[tokio::test]
    async fn non_success_status_fails_the_action() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let node = Node::new("call", NodeType::Action).with_config("url", json!(server.uri()));
        let err = actions().invoke("http_request", &node, &context()).await.unwrap_err();
        assert!(matches!(err, NodeExecutionError::ActionFailed { ref reason, .. } if reason.contains("500")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn set_log_and_unknown_actions() {
        let node = Node::new("s", NodeType::Action).with_config("value", json!({"greeting": "hi {{payload.user}}"}));
        let out = actions().invoke("set", &node, &context()).await.unwrap();
        assert_eq!(out, json!({"greeting": "hi ada"}));

        let node = Node::new("l", NodeType::Action).with_config("message", json!("user={{payload.user}}"));
        let out = actions().invoke("log", &node, &context()).await.unwrap();
        assert_eq!(out["message"], "user=ada");

        let err = actions().invoke("send_fax", &node, &context()).await.unwrap_err();
        assert_eq!(err, NodeExecutionError::UnknownAction { action: "send_fax".into() });
        assert!(!err.is_retryable());
    }
}
