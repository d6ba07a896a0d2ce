//! Configuration structures.
//!
//! Configuration is loaded from a JSON config file and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{Error, Result};

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Default resource limits.
    #[serde(default)]
    pub defaults: DefaultLimits,

    /// Scheduler settings.
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: Config = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `JEEVES_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("JEEVES_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("JEEVES_LOG_FORMAT") {
            self.observability.json_logs = format.eq_ignore_ascii_case("json");
        }
        if let Some(v) = env_i32("JEEVES_MAX_LLM_CALLS")? {
            self.defaults.max_llm_calls = v;
        }
        if let Some(v) = env_i32("JEEVES_MAX_AGENT_HOPS")? {
            self.defaults.max_agent_hops = v;
        }
        if let Some(v) = env_i32("JEEVES_MAX_ITERATIONS")? {
            self.defaults.max_iterations = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_positive(self.defaults.max_llm_calls, "defaults.max_llm_calls")?;
        crate::validation::validate_positive(self.defaults.max_agent_hops, "defaults.max_agent_hops")?;
        crate::validation::validate_non_negative(
            self.defaults.max_iterations,
            "defaults.max_iterations",
        )?;
        crate::validation::validate_non_negative(
            self.defaults.default_edge_limit,
            "defaults.default_edge_limit",
        )?;
        if self.runtime.stream_buffer == 0 {
            return Err(Error::validation("runtime.stream_buffer must be positive"));
        }
        Ok(())
    }
}

fn env_i32(key: &str) -> Result<Option<i32>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|e| Error::validation(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Default resource limits applied to pipelines that do not set their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefaultLimits {
    /// Maximum LLM calls per envelope.
    pub max_llm_calls: i32,

    /// Maximum agent hops per envelope.
    pub max_agent_hops: i32,

    /// Maximum loop-back iterations per envelope.
    pub max_iterations: i32,

    /// Per-agent timeout when the agent config does not set one.
    #[serde(with = "humantime_serde")]
    pub agent_timeout: Duration,

    /// Edge traversal cap for transitions without an explicit limit (0 = unlimited).
    pub default_edge_limit: i32,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            max_llm_calls: 10,
            max_agent_hops: 21,
            max_iterations: 3,
            agent_timeout: Duration::from_secs(120),
            default_edge_limit: 0,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    /// Capacity of the per-run stage output channel in streaming mode.
    pub stream_buffer: usize,

    /// Maximum stages dispatched concurrently in one parallel round (0 = no cap).
    pub max_parallel_stages: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            stream_buffer: 64,
            max_parallel_stages: 0,
        }
    }
}
