//! Worker configuration, loaded from environment variables at startup.

use std::time::Duration;

use crate::provider::PollPolicy;

/// Runtime configuration for the generation worker.
///
/// Every field has a sensible default so the worker runs out-of-the-box
/// without any environment variables set (external models still need an API
/// key to produce anything).
#[derive(Debug, Clone)]
pub struct Config {
    /// Accelerator memory budget for resident pipelines, in GiB.
    pub memory_budget_gib: f32,

    /// How many pipelines may stay cached in host memory.
    pub max_cached_models: usize,

    /// Base URL of the provider gateway.
    pub provider_base_url: String,

    /// Bearer token for the provider gateway.
    pub provider_api_key: String,

    /// Hard deadline for one provider job, in seconds.
    pub provider_timeout_secs: u64,

    /// First poll interval for provider jobs, in milliseconds.
    pub poll_initial_ms: u64,

    /// Poll interval cap, in milliseconds.
    pub poll_max_ms: u64,

    /// `tracing` filter string, e.g. `"info"` or `"debug,kiln_core=trace"`.
    pub log_level: String,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            memory_budget_gib: parse_env("KILN_MEMORY_BUDGET_GIB", 24.0),
            max_cached_models: parse_env("KILN_MAX_CACHED_MODELS", 2),
            provider_base_url: env_or("KILN_PROVIDER_URL", "http://127.0.0.1:8900"),
            provider_api_key: env_or("KILN_PROVIDER_API_KEY", ""),
            provider_timeout_secs: parse_env("KILN_PROVIDER_TIMEOUT_SECS", 600),
            poll_initial_ms: parse_env("KILN_POLL_INITIAL_MS", 500),
            poll_max_ms: parse_env("KILN_POLL_MAX_MS", 5000),
            log_level: env_or("KILN_LOG", "info"),
        }
    }

    /// Poll pacing derived from the configured intervals.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(self.poll_initial_ms),
            backoff_multiplier: 1.5,
            max_interval: Duration::from_millis(self.poll_max_ms),
            timeout: Duration::from_secs(self.provider_timeout_secs),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::from_env();
        assert!(config.memory_budget_gib > 0.0);
        assert!(config.max_cached_models >= 1);
        let policy = config.poll_policy();
        assert!(policy.initial_interval <= policy.max_interval);
    }
}
