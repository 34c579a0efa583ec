/// Provider profiles
///
/// A profile describes one external language-model provider: the models it
/// offers with their context length and price, how fast it is, where it
/// lives and whether credentials are configured. Profiles are built once at
/// startup and are read-only afterwards.

use serde::{Deserialize, Serialize};

/// Relative latency class used by the speed bonus in provider scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    Standard,
    Fast,
}

/// One model offered by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub context_length: u32,
    /// USD per 1k tokens
    pub cost_per_1k: f64,
}

impl ModelSpec {
    pub fn new(name: &str, context_length: u32, cost_per_1k: f64) -> Self {
        Self {
            name: name.to_string(),
            context_length,
            cost_per_1k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Provider name; also the key into the adapter table
    pub name: String,
    pub models: Vec<ModelSpec>,
    pub speed_class: SpeedClass,
    pub base_url: String,
    /// Never serialized back out
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl ProviderProfile {
    pub fn new(name: &str, base_url: &str, speed_class: SpeedClass, models: Vec<ModelSpec>) -> Self {
        Self {
            name: name.to_string(),
            models,
            speed_class,
            base_url: base_url.to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// Fill credentials and base URL from `<NAME>_API_KEY` / `<NAME>_BASE_URL`
    pub fn apply_env(mut self) -> Self {
        let prefix = self.name.to_uppercase();
        if let Ok(key) = std::env::var(format!("{}_API_KEY", prefix)) {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var(format!("{}_BASE_URL", prefix)) {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        self
    }
}

/// Built-in provider catalog, in selection tie-break order
///
/// Credentials are not set here; see `ProviderProfile::apply_env`.
pub fn default_catalog() -> Vec<ProviderProfile> {
    vec![
        ProviderProfile::new(
            "anthropic",
            "https://api.anthropic.com",
            SpeedClass::Standard,
            vec![
                ModelSpec::new("claude-3-5-sonnet-20241022", 200_000, 0.003),
                ModelSpec::new("claude-3-5-haiku-20241022", 200_000, 0.0008),
            ],
        ),
        ProviderProfile::new(
            "openai",
            "https://api.openai.com/v1",
            SpeedClass::Standard,
            vec![
                ModelSpec::new("gpt-4o", 128_000, 0.0025),
                ModelSpec::new("gpt-4o-mini", 128_000, 0.00015),
            ],
        ),
        ProviderProfile::new(
            "groq",
            "https://api.groq.com/openai/v1",
            SpeedClass::Fast,
            vec![
                ModelSpec::new("llama-3.3-70b-versatile", 131_072, 0.0008),
                ModelSpec::new("llama-3.1-8b-instant", 131_072, 0.0001),
            ],
        ),
        ProviderProfile::new(
            "gemini",
            "https://generativelanguage.googleapis.com",
            SpeedClass::Fast,
            vec![
                ModelSpec::new("gemini-1.5-flash", 1_000_000, 0.000075),
                ModelSpec::new("gemini-1.5-pro", 2_000_000, 0.00125),
            ],
        ),
        ProviderProfile::new(
            "perplexity",
            "https://api.perplexity.ai",
            SpeedClass::Standard,
            vec![ModelSpec::new("llama-3.1-sonar-large-128k-online", 127_072, 0.001)],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_do_not_count_as_credentials() {
        let profile = ProviderProfile::new("x", "http://x", SpeedClass::Fast, vec![]);
        assert!(!profile.has_credentials());
        assert!(!profile.clone().with_api_key("  ").has_credentials());
        assert!(profile.with_api_key("sk-1").has_credentials());
    }

    #[test]
    fn api_key_is_not_serialized() {
        let profile = ProviderProfile::new("x", "http://x", SpeedClass::Fast, vec![]).with_api_key("secret");
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn catalog_names_are_unique() {
        let catalog = default_catalog();
        let mut names: Vec<&str> = catalog.iter().map(|p| p.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), catalog.len());
    }
}
