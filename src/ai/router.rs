/// AI provider routing
///
/// Picks a (provider, model) for a request from the configured profiles by
/// cost and speed, invokes it through the adapter table, and walks a bounded
/// fallback chain when a provider is unavailable.

use crate::ai::adapter::AdapterTable;
use crate::ai::profile::{ProviderProfile, SpeedClass};
use crate::ai::transport::{ProviderTransport, MAX_PROVIDER_TIMEOUT};
use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Bonus added to fast-class providers when the caller asks for speed
const SPEED_BONUS: f64 = 50.0;

/// Constraints for choosing a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub min_context_length: u32,
    #[serde(default = "default_max_cost")]
    pub max_cost_per_1k: f64,
    #[serde(default)]
    pub speed_priority: bool,
}

fn default_max_cost() -> f64 {
    1.0
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            min_context_length: 0,
            max_cost_per_1k: default_max_cost(),
            speed_priority: false,
        }
    }
}

/// A concrete provider/model pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub provider: String,
    pub model: String,
}

impl Target {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

/// Outcome of `select_provider`
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub target: Target,
    pub score: f64,
    /// True when no candidate met the requirements and the default was used
    pub is_default: bool,
}

/// Successful routed completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiCompletion {
    pub content: String,
    pub provider: String,
    pub model: String,
    /// Number of provider calls made, including the successful one
    pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub max_fallback_attempts: usize,
    pub default_target: Target,
    /// Per-call timeout, clamped to the 60s ceiling
    pub call_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_fallback_attempts: 3,
            default_target: Target::new("groq", "llama-3.1-8b-instant"),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Score used to rank candidates; higher is better
pub fn score(cost_per_1k: f64, speed_class: SpeedClass, speed_priority: bool) -> f64 {
    let mut score = 100.0 - cost_per_1k * 1000.0;
    if speed_priority && speed_class == SpeedClass::Fast {
        score += SPEED_BONUS;
    }
    score
}

/// Cost/speed-aware router over a fixed set of provider profiles
pub struct AiProviderRouter {
    profiles: Vec<ProviderProfile>,
    adapters: AdapterTable,
    transport: Arc<dyn ProviderTransport>,
    settings: RouterSettings,
}

impl std::fmt::Debug for AiProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiProviderRouter")
            .field("providers", &self.profiles.iter().map(|p| p.name.as_str()).collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl AiProviderRouter {
    pub fn new(
        profiles: Vec<ProviderProfile>,
        adapters: AdapterTable,
        transport: Arc<dyn ProviderTransport>,
        settings: RouterSettings,
    ) -> Self {
        let configured = profiles.iter().filter(|p| p.has_credentials()).count();
        tracing::info!("🤖 AI router ready: {} providers ({} with credentials)", profiles.len(), configured);
        Self {
            profiles,
            adapters,
            transport,
            settings,
        }
    }

    /// Choose the best candidate for `requirements`
    ///
    /// Never fails: when nothing qualifies the configured default target is returned.
    pub fn select_provider(&self, requirements: &Requirements) -> Selection {
        self.select_excluding(requirements, &HashSet::new())
            .unwrap_or_else(|| self.default_selection())
    }

    fn default_selection(&self) -> Selection {
        tracing::warn!("⚠️ No provider meets the requirements, using default {}/{}",
            self.settings.default_target.provider, self.settings.default_target.model);
        Selection {
            target: self.settings.default_target.clone(),
            score: 0.0,
            is_default: true,
        }
    }

    /// Highest-scoring candidate not in `excluded`; ties go to the earlier
    /// provider, then the earlier model
    fn select_excluding(&self, requirements: &Requirements, excluded: &HashSet<Target>) -> Option<Selection> {
        let mut best: Option<Selection> = None;

        for profile in self.profiles.iter().filter(|p| p.has_credentials()) {
            for model in &profile.models {
                if model.context_length < requirements.min_context_length
                    || model.cost_per_1k > requirements.max_cost_per_1k
                {
                    continue;
                }
                let target = Target::new(&profile.name, &model.name);
                if excluded.contains(&target) {
                    continue;
                }

                let candidate_score = score(model.cost_per_1k, profile.speed_class, requirements.speed_priority);
                if best.as_ref().map_or(true, |b| candidate_score > b.score) {
                    best = Some(Selection {
                        target,
                        score: candidate_score,
                        is_default: false,
                    });
                }
            }
        }

        best
    }

    /// Call one provider/model
    ///
    /// Every failure surfaces as `ProviderError::Unavailable`.
    pub async fn invoke(&self, target: &Target, system_prompt: &str, user_prompt: &str) -> Result<String, ProviderError> {
        let unavailable = |reason: String| ProviderError::unavailable(&target.provider, &target.model, reason);

        let profile = self
            .profiles
            .iter()
            .find(|p| p.name == target.provider)
            .ok_or_else(|| unavailable("provider not configured".to_string()))?;
        if !profile.has_credentials() {
            return Err(unavailable("missing credentials".to_string()));
        }
        let adapter = self
            .adapters
            .get(&target.provider)
            .ok_or_else(|| unavailable("no adapter registered".to_string()))?;

        let request = adapter.build_request(profile, &target.model, system_prompt, user_prompt);
        let timeout = self.settings.call_timeout.min(MAX_PROVIDER_TIMEOUT);

        let body = match tokio::time::timeout(timeout, self.transport.send(&request)).await {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => return Err(unavailable(err.to_string())),
            Err(_) => return Err(unavailable(format!("timed out after {:?}", timeout))),
        };

        adapter
            .parse_response(&body)
            .ok_or_else(|| unavailable("malformed response payload".to_string()))
    }

    /// Select, invoke, and on failure drop the failed target and re-select
    ///
    /// Makes at most `max_fallback_attempts` calls and never calls the same
    /// target twice. Exhaustion returns the last error wrapped in
    /// `AllProvidersExhausted`.
    pub async fn invoke_with_fallback(
        &self,
        requirements: &Requirements,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<AiCompletion, ProviderError> {
        let mut excluded = HashSet::new();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.settings.max_fallback_attempts {
            let selection = match self.select_excluding(requirements, &excluded) {
                Some(selection) => selection,
                None if attempts == 0 => self.default_selection(),
                None => break,
            };
            attempts += 1;

            tracing::info!("🎯 AI attempt {}: {}/{} (score {:.2})",
                attempts, selection.target.provider, selection.target.model, selection.score);

            match self.invoke(&selection.target, system_prompt, user_prompt).await {
                Ok(content) => {
                    return Ok(AiCompletion {
                        content,
                        provider: selection.target.provider,
                        model: selection.target.model,
                        attempts,
                    });
                }
                Err(err) => {
                    tracing::warn!("🔀 Provider failed, falling back: {}", err);
                    excluded.insert(selection.target);
                    last_error = Some(err);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| {
            ProviderError::unavailable(
                &self.settings.default_target.provider,
                &self.settings.default_target.model,
                "no attempts were made",
            )
        });
        tracing::error!("❌ All providers exhausted after {} attempt(s)", attempts);
        Err(ProviderError::AllProvidersExhausted {
            attempts,
            last: Box::new(last),
        })
    }
}
