/// Configuration management for the RelayFlow engine
///
/// Handles server binding, storage location, engine limits and AI provider
/// settings. Defaults come from `RELAYFLOW_*` environment variables so the
/// same binary runs unchanged in containers.

use crate::ai::profile::{default_catalog, ProviderProfile};
use crate::ai::router::{RouterSettings, Target};
use crate::ai::transport::MAX_PROVIDER_TIMEOUT;
use crate::runtime::engine::CoordinatorSettings;
use crate::runtime::executor::ExecutorSettings;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub ai: AiConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

/// SQLite storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the database file (default: "data")
    pub data_dir: String,
    /// Database file name (default: "relayflow.db")
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of an idempotency key
    pub idempotency_ttl_secs: u64,
    /// Whole-run budget; checked between nodes
    pub run_timeout_secs: u64,
    /// Linear retry backoff unit
    pub retry_backoff_ms: u64,
    /// Upper bound for Delay nodes
    pub max_delay_secs: u64,
    /// Max serialized size of a logged output or error
    pub log_output_limit: usize,
    /// How often expired idempotency keys are reclaimed
    pub reaper_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Per provider call; must stay under both 60s and the run timeout
    pub provider_timeout_secs: u64,
    pub max_fallback_attempts: usize,
    /// Used when no provider meets a request's requirements
    pub default_provider: String,
    pub default_model: String,
    /// Provider catalog with credentials applied from the environment
    pub providers: Vec<ProviderProfile>,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|value| value.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("RELAYFLOW_HOST", "0.0.0.0".to_string()),
                port: env_or("RELAYFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("RELAYFLOW_DATA_DIR", "data".to_string()),
                file_name: env_or("RELAYFLOW_DB_FILE", "relayflow.db".to_string()),
            },
            engine: EngineConfig {
                idempotency_ttl_secs: env_or("RELAYFLOW_IDEMPOTENCY_TTL_SECS", 86_400),
                run_timeout_secs: env_or("RELAYFLOW_RUN_TIMEOUT_SECS", 300),
                retry_backoff_ms: env_or("RELAYFLOW_RETRY_BACKOFF_MS", 500),
                max_delay_secs: env_or("RELAYFLOW_MAX_DELAY_SECS", 3_600),
                log_output_limit: env_or("RELAYFLOW_LOG_OUTPUT_LIMIT", 2_000),
                reaper_interval_secs: env_or("RELAYFLOW_REAPER_INTERVAL_SECS", 60),
            },
            ai: AiConfig {
                provider_timeout_secs: env_or("RELAYFLOW_PROVIDER_TIMEOUT_SECS", 30),
                max_fallback_attempts: env_or("RELAYFLOW_MAX_FALLBACK_ATTEMPTS", 3),
                default_provider: env_or("RELAYFLOW_DEFAULT_PROVIDER", "groq".to_string()),
                default_model: env_or("RELAYFLOW_DEFAULT_MODEL", "llama-3.1-8b-instant".to_string()),
                providers: default_catalog().into_iter().map(ProviderProfile::apply_env).collect(),
            },
        }
    }
}

impl Config {
    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        let provider_timeout = Duration::from_secs(self.ai.provider_timeout_secs);
        if provider_timeout > MAX_PROVIDER_TIMEOUT {
            anyhow::bail!("ai.provider_timeout_secs must be at most {}", MAX_PROVIDER_TIMEOUT.as_secs());
        }
        if self.ai.provider_timeout_secs >= self.engine.run_timeout_secs {
            anyhow::bail!("ai.provider_timeout_secs must be shorter than engine.run_timeout_secs so a fallback can still run");
        }
        if self.ai.max_fallback_attempts == 0 {
            anyhow::bail!("ai.max_fallback_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.provider_timeout_secs).min(MAX_PROVIDER_TIMEOUT)
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            max_fallback_attempts: self.ai.max_fallback_attempts,
            default_target: Target::new(&self.ai.default_provider, &self.ai.default_model),
            call_timeout: self.provider_timeout(),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            retry_backoff: Duration::from_millis(self.engine.retry_backoff_ms),
            max_delay: Duration::from_secs(self.engine.max_delay_secs),
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            idempotency_ttl: Duration::from_secs(self.engine.idempotency_ttl_secs),
            run_timeout: Duration::from_secs(self.engine.run_timeout_secs),
            log_output_limit: self.engine.log_output_limit,
        }
    }
}
