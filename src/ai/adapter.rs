/// Provider wire adapters
///
/// Each provider wants a different auth header, endpoint and request/response
/// schema. An adapter captures that mapping once; the adapter table keys
/// adapters by provider name, so a new provider is a table entry rather than
/// a new branch in the router.

use crate::ai::profile::ProviderProfile;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const MAX_OUTPUT_TOKENS: u32 = 4096;

/// A fully built HTTP request for one provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Request/response mapping for one provider API shape
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    fn build_request(&self, profile: &ProviderProfile, model: &str, system_prompt: &str, user_prompt: &str) -> ProviderRequest;

    /// Extract the generated text; `None` when the payload has an unexpected shape
    fn parse_response(&self, body: &Value) -> Option<String>;
}

fn api_key(profile: &ProviderProfile) -> &str {
    profile.api_key.as_deref().unwrap_or_default()
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Anthropic Messages API
#[derive(Debug, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn build_request(&self, profile: &ProviderProfile, model: &str, system_prompt: &str, user_prompt: &str) -> ProviderRequest {
        ProviderRequest {
            url: join_url(&profile.base_url, "v1/messages"),
            headers: vec![
                ("x-api-key".into(), api_key(profile).to_string()),
                ("anthropic-version".into(), "2023-06-01".into()),
            ],
            body: json!({
                "model": model,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "system": system_prompt,
                "messages": [{"role": "user", "content": user_prompt}],
            }),
        }
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        let blocks = body.get("content")?.as_array()?;
        let text: Vec<&str> = blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        (!text.is_empty()).then(|| text.concat())
    }
}

/// OpenAI chat-completions shape, shared by OpenAI-compatible providers
#[derive(Debug, Default)]
pub struct OpenAiCompatibleAdapter;

impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn build_request(&self, profile: &ProviderProfile, model: &str, system_prompt: &str, user_prompt: &str) -> ProviderRequest {
        ProviderRequest {
            url: join_url(&profile.base_url, "chat/completions"),
            headers: vec![("authorization".into(), format!("Bearer {}", api_key(profile)))],
            body: json!({
                "model": model,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "temperature": 0.7,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt},
                ],
            }),
        }
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        body.get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
            .map(str::to_string)
    }
}

/// Google Gemini generateContent API
#[derive(Debug, Default)]
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn build_request(&self, profile: &ProviderProfile, model: &str, system_prompt: &str, user_prompt: &str) -> ProviderRequest {
        ProviderRequest {
            url: join_url(&profile.base_url, &format!("v1beta/models/{}:generateContent", model)),
            headers: vec![("x-goog-api-key".into(), api_key(profile).to_string())],
            body: json!({
                "systemInstruction": {"parts": [{"text": system_prompt}]},
                "contents": [{"role": "user", "parts": [{"text": user_prompt}]}],
                "generationConfig": {"maxOutputTokens": MAX_OUTPUT_TOKENS},
            }),
        }
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        let parts = body
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .as_array()?;
        let text: Vec<&str> = parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect();
        (!text.is_empty()).then(|| text.concat())
    }
}

/// Provider name -> adapter
#[derive(Debug, Clone, Default)]
pub struct AdapterTable {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterTable {
    /// Adapters for every provider in the default catalog
    pub fn standard() -> Self {
        let openai: Arc<dyn ProviderAdapter> = Arc::new(OpenAiCompatibleAdapter);
        Self::default()
            .with("anthropic", Arc::new(AnthropicAdapter))
            .with("openai", Arc::clone(&openai))
            .with("groq", Arc::clone(&openai))
            .with("perplexity", openai)
            .with("gemini", Arc::new(GeminiAdapter))
    }

    pub fn with(mut self, provider: &str, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(provider.to_string(), adapter);
        self
    }

    pub fn get(&self, provider: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::profile::SpeedClass;

    fn profile(name: &str, base: &str) -> ProviderProfile {
        ProviderProfile::new(name, base, SpeedClass::Standard, vec![]).with_api_key("key-1")
    }

    #[test]
    fn anthropic_uses_api_key_header_and_text_blocks() {
        let adapter = AnthropicAdapter;
        let req = adapter.build_request(&profile("anthropic", "https://a.test/"), "claude", "sys", "hi");
        assert_eq!(req.url, "https://a.test/v1/messages");
        assert!(req.headers.contains(&("x-api-key".into(), "key-1".into())));
        assert_eq!(req.body["system"], "sys");
        assert_eq!(req.body["messages"][0]["content"], "hi");

        let body = json!({"content": [{"type": "text", "text": "Hel"}, {"type": "text", "text": "lo"}]});
        assert_eq!(adapter.parse_response(&body).as_deref(), Some("Hello"));
        assert_eq!(adapter.parse_response(&json!({"content": []})), None);
    }

    #[test]
    fn openai_compatible_uses_bearer_and_choices() {
        let adapter = OpenAiCompatibleAdapter;
        let req = adapter.build_request(&profile("groq", "https://g.test/openai/v1"), "llama", "sys", "hi");
        assert_eq!(req.url, "https://g.test/openai/v1/chat/completions");
        assert!(req.headers.contains(&("authorization".into(), "Bearer key-1".into())));
        assert_eq!(req.body["messages"][0]["role"], "system");

        let body = json!({"choices": [{"message": {"content": "ok"}}]});
        assert_eq!(adapter.parse_response(&body).as_deref(), Some("ok"));
        assert_eq!(adapter.parse_response(&json!({"error": "x"})), None);
    }

    #[test]
    fn gemini_puts_model_in_path() {
        let adapter = GeminiAdapter;
        let req = adapter.build_request(&profile("gemini", "https://gm.test"), "gemini-1.5-flash", "sys", "hi");
        assert_eq!(req.url, "https://gm.test/v1beta/models/gemini-1.5-flash:generateContent");
        let body = json!({"candidates": [{"content": {"parts": [{"text": "yo"}]}}]});
        assert_eq!(adapter.parse_response(&body).as_deref(), Some("yo"));
    }

    #[test]
    fn standard_table_covers_catalog() {
        let table = AdapterTable::standard();
        for profile in crate::ai::profile::default_catalog() {
            assert!(table.get(&profile.name).is_some(), "missing adapter for {}", profile.name);
        }
    }
}
