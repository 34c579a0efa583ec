/// HTTP transport for provider calls
///
/// The router talks to providers through `ProviderTransport`, so tests and
/// alternative clients can stand in for the network. `HttpTransport` is the
/// production implementation on top of reqwest.

use crate::ai::adapter::ProviderRequest;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Hard ceiling for a single provider call
pub const MAX_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response body: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// POST the request body as JSON and return the parsed JSON response
    ///
    /// Non-2xx statuses and non-JSON bodies are errors.
    async fn send(&self, request: &ProviderRequest) -> Result<Value, TransportError>;
}

/// reqwest-backed transport with a bounded per-call timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` is clamped to `MAX_PROVIDER_TIMEOUT`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout.min(MAX_PROVIDER_TIMEOUT))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<Value, TransportError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::debug!("🌍 Provider request: POST {}", request.url);
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let body: String = text.chars().take(500).collect();
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(server: &MockServer) -> ProviderRequest {
        ProviderRequest {
            url: format!("{}/chat/completions", server.uri()),
            headers: vec![("authorization".into(), "Bearer k".into())],
            body: json!({"model": "m"}),
        }
    }

    #[tokio::test]
    async fn sends_headers_and_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let body = transport.send(&request(&server)).await.unwrap();
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn non_success_and_bad_json_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        assert_eq!(
            transport.send(&request(&server)).await,
            Err(TransportError::Status { status: 503, body: "overloaded".into() })
        );
        assert!(matches!(transport.send(&request(&server)).await, Err(TransportError::Decode(_))));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)).set_body_json(json!({})))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_millis(50)).unwrap();
        assert_eq!(transport.send(&request(&server)).await, Err(TransportError::Timeout));
    }
}
