//! Observability utilities.
//!
//! Structured logging goes through `tracing`; metrics go through an injected
//! [`MetricsCollector`] so the engine never touches process-wide counters.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::envelope::{ProcessingStatus, TerminalReason};
use crate::types::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process.
///
/// `RUST_LOG` wins over the configured level. Log format is JSON when
/// `json_logs` is set or `JEEVES_LOG_FORMAT=json`, compact text otherwise.
pub fn init_tracing(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let json = config.json_logs
            || std::env::var("JEEVES_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// Receives engine metrics. Every hook defaults to a no-op.
pub trait MetricsCollector: Send + Sync {
    fn agent_completed(&self, _agent: &str, _status: ProcessingStatus, _duration_ms: i64) {}

    fn llm_call(&self, _agent: &str, _role: &str) {}

    fn tool_call(&self, _agent: &str, _tool: &str, _success: bool, _duration_ms: i64) {}

    fn pipeline_finished(&self, _pipeline: &str, _reason: Option<TerminalReason>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {}

/// Counts events in memory; handy for tests and debugging endpoints.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: Mutex<HashMap<String, u64>>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name` (0 when never incremented).
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn incr(&self, name: String) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name).or_default() += 1;
        }
    }
}

impl MetricsCollector for CountingMetrics {
    fn agent_completed(&self, agent: &str, status: ProcessingStatus, _duration_ms: i64) {
        self.incr(format!("agent.{agent}.{status:?}").to_lowercase());
    }

    fn llm_call(&self, agent: &str, _role: &str) {
        self.incr(format!("llm.{agent}"));
    }

    fn tool_call(&self, _agent: &str, tool: &str, success: bool, _duration_ms: i64) {
        let outcome = if success { "ok" } else { "failed" };
        self.incr(format!("tool.{tool}.{outcome}"));
    }

    fn pipeline_finished(&self, pipeline: &str, reason: Option<TerminalReason>) {
        let reason = reason.map(|r| format!("{r:?}")).unwrap_or_else(|| "terminated".into());
        self.incr(format!("pipeline.{pipeline}.{reason}").to_lowercase());
    }
}
