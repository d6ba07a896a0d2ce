//! Agent - one configurable processing unit of the pipeline.
//!
//! An [`Agent`] is bound to one [`AgentConfig`] and a set of injected
//! capabilities. Each call to [`Agent::process`] runs the fixed lifecycle:
//!
//! ```text
//!   AgentStarted → record start → pre-process hook
//!     → main processing (mock | llm | tools | passthrough, with timeout/retries)
//!     → required-field + schema validation → store output → post-process hook
//!     → routing → record complete → metrics → AgentCompleted
//! ```
//!
//! Stage failures are returned as data inside [`AgentOutcome`], never as `Err`.

pub mod capabilities;
pub mod hooks;
pub mod llm;
pub mod parse;
pub mod routing;
pub mod tools;

pub use capabilities::{
    AgentCapabilities, GenerateOptions, LlmProvider, PromptRegistry, ProviderError,
    TemplatePromptRegistry,
};
pub use hooks::{AgentHooks, MockHandler, PostProcessHook, PreProcessHook};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::envelope::{AgentOutput, Envelope, FailureKind, ProcessingStatus, StageError};
use crate::events::AgentEvent;
use crate::pipeline::AgentConfig;
use crate::tools::ToolAccessPolicy;
use crate::types::{Error, Result};

/// Per-attempt deadline for agents that do not configure one.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a crate error; infrastructure errors keep their own kind.
    pub fn from_error(default_kind: FailureKind, err: Error) -> Self {
        let kind = match err {
            Error::Cancelled(_) => FailureKind::Cancelled,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::Validation(_) if default_kind != FailureKind::Hook => FailureKind::Validation,
            _ => default_kind,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result of one agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub agent: String,
    pub output_key: String,
    /// Routing target (`END_STAGE` when the run should end).
    pub next_stage: String,
    /// Stored output, or the error output on failure.
    pub output: Option<AgentOutput>,
    pub status: ProcessingStatus,
    pub failure: Option<StageFailure>,
    pub llm_calls: i32,
    pub tool_calls: i32,
    pub duration_ms: i64,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ProcessingStatus::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::Cancelled)
    }
}

/// A processing unit bound to one agent configuration.
pub struct Agent {
    config: AgentConfig,
    capabilities: AgentCapabilities,
    hooks: AgentHooks,
    policy: ToolAccessPolicy,
    output_validator: Option<jsonschema::Validator>,
    default_timeout: Duration,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("capabilities", &self.capabilities)
            .field("hooks", &self.hooks)
            .field("has_output_schema", &self.output_validator.is_some())
            .finish()
    }
}

impl Agent {
    /// Build an agent. Fails if the config is invalid or a capability the
    /// config asks for was not provided.
    pub fn new(
        config: AgentConfig,
        capabilities: AgentCapabilities,
        hooks: AgentHooks,
    ) -> Result<Self> {
        config.validate()?;

        if config.has_llm && capabilities.llm.is_none() {
            return Err(Error::config(format!(
                "agent '{}' has_llm but no LLM provider was provided",
                config.name
            )));
        }
        if config.has_tools && capabilities.tools.is_none() {
            return Err(Error::config(format!(
                "agent '{}' has_tools but no tool executor was provided",
                config.name
            )));
        }
        if config.use_mock && hooks.mock_handler.is_none() {
            return Err(Error::config(format!(
                "agent '{}' use_mock but no mock handler was provided",
                config.name
            )));
        }

        let output_validator = config
            .output_schema
            .as_ref()
            .map(jsonschema::validator_for)
            .transpose()
            .map_err(|e| {
                Error::validation(format!(
                    "agent '{}': invalid output_schema: {}",
                    config.name, e
                ))
            })?;

        Ok(Self {
            policy: ToolAccessPolicy::for_agent(&config),
            config,
            capabilities,
            hooks,
            output_validator,
            default_timeout: DEFAULT_AGENT_TIMEOUT,
        })
    }

    /// Deadline used when the config does not set `timeout`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the full agent lifecycle against `envelope`.
    pub async fn process(&self, envelope: &mut Envelope, cancel: &CancellationToken) -> AgentOutcome {
        let span = info_span!(
            "agent",
            agent = %self.config.name,
            envelope_id = %envelope.identity.envelope_id,
            stage_order = self.config.stage_order,
        );
        self.process_inner(envelope, cancel).instrument(span).await
    }

    async fn process_inner(
        &self,
        envelope: &mut Envelope,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        let started = Instant::now();
        let name = self.config.name.clone();
        let envelope_id = envelope.identity.envelope_id.to_string();
        let output_key = self.config.effective_output_key().to_string();

        self.capabilities.events.emit(AgentEvent::Started {
            agent: name.clone(),
            envelope_id: envelope_id.clone(),
            stage_order: self.config.stage_order,
        });
        envelope.record_agent_start(&name, self.config.stage_order);

        let mut llm_calls = 0;
        let mut tool_calls = 0;
        let result = self
            .run_lifecycle(envelope, cancel, &mut llm_calls, &mut tool_calls)
            .await;
        envelope.increment_tool_calls(tool_calls);

        let (status, output, failure, next_stage) = match result {
            Ok(output) => {
                let next = routing::next_stage(&self.config, &output);
                (ProcessingStatus::Success, output, None, next)
            }
            Err(failure) => {
                warn!(kind = ?failure.kind, error = %failure.message, "agent failed");
                envelope.add_error(StageError {
                    stage: name.clone(),
                    agent: name.clone(),
                    kind: failure.kind,
                    message: failure.message.clone(),
                    occurred_at: Utc::now(),
                });
                let error_output = routing::error_output(failure.kind, &failure.message);
                let next = routing::next_stage_on_failure(&self.config, &error_output);
                if failure.kind != FailureKind::Cancelled {
                    envelope.set_output(&output_key, error_output.clone());
                }
                (ProcessingStatus::Error, error_output, Some(failure), next)
            }
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        envelope.record_agent_complete(
            &name,
            status,
            failure.as_ref().map(|f| f.message.clone()),
            llm_calls,
            duration_ms,
        );
        self.capabilities
            .metrics
            .agent_completed(&name, status, duration_ms);
        self.capabilities.events.emit(AgentEvent::Completed {
            agent: name.clone(),
            envelope_id,
            status,
            failure: failure.as_ref().map(|f| f.kind),
            next_stage: Some(next_stage.clone()),
            llm_calls,
            duration_ms,
        });
        info!(next_stage = %next_stage, ?status, duration_ms, "agent finished");

        AgentOutcome {
            agent: name,
            output_key,
            next_stage,
            output: Some(output),
            status,
            failure,
            llm_calls,
            tool_calls,
            duration_ms,
        }
    }

    async fn run_lifecycle(
        &self,
        envelope: &mut Envelope,
        cancel: &CancellationToken,
        llm_calls: &mut i32,
        tool_calls: &mut i32,
    ) -> std::result::Result<AgentOutput, StageFailure> {
        if let Some(pre) = &self.hooks.pre_process {
            pre(envelope, &self.config.name)
                .map_err(|e| StageFailure::from_error(FailureKind::Hook, e))?;
        }

        let output = self
            .run_main(envelope, cancel, llm_calls, tool_calls)
            .await?;
        self.validate_output(&output)?;
        envelope.set_output(self.config.effective_output_key(), output.clone());

        if let Some(post) = &self.hooks.post_process {
            post(envelope, &output, &self.config.name)
                .map_err(|e| StageFailure::from_error(FailureKind::Hook, e))?;
        }
        Ok(output)
    }

    /// Mode-specific processing, with per-attempt timeout, cancellation and
    /// retries on business failures.
    async fn run_main(
        &self,
        envelope: &mut Envelope,
        cancel: &CancellationToken,
        llm_calls: &mut i32,
        tool_calls: &mut i32,
    ) -> std::result::Result<AgentOutput, StageFailure> {
        if self.config.use_mock {
            let handler = self.hooks.mock_handler.as_ref().ok_or_else(|| {
                StageFailure::new(FailureKind::Validation, "mock handler missing")
            })?;
            debug!("running mock handler");
            return handler(envelope).map_err(|e| StageFailure::from_error(FailureKind::Llm, e));
        }

        if !self.config.has_llm && !self.config.has_tools {
            let mut output = AgentOutput::new();
            output.insert("passthrough".to_string(), Value::Bool(true));
            output.insert(
                "raw_input".to_string(),
                Value::String(envelope.raw_input.clone()),
            );
            return Ok(output);
        }

        let timeout = self.config.timeout.unwrap_or(self.default_timeout);
        let attempts = self.config.max_retries + 1;
        let envelope: &Envelope = envelope;
        let mut last_failure = None;

        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Err(StageFailure::new(FailureKind::Cancelled, "run cancelled"))
                }
                r = tokio::time::timeout(
                    timeout,
                    self.run_mode(envelope, cancel, llm_calls, tool_calls),
                ) => match r {
                    Ok(r) => r,
                    Err(_) => Err(StageFailure::new(
                        FailureKind::Timeout,
                        format!("attempt {} exceeded {:?}", attempt, timeout),
                    )),
                },
            };

            match result {
                Ok(output) => return Ok(output),
                Err(failure) if failure.kind.is_infrastructure() => return Err(failure),
                Err(failure) => {
                    if attempt < attempts {
                        warn!(attempt, error = %failure.message, "attempt failed, retrying");
                    }
                    last_failure = Some(failure);
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| StageFailure::new(FailureKind::Validation, "no attempt was made")))
    }

    async fn run_mode(
        &self,
        envelope: &Envelope,
        cancel: &CancellationToken,
        llm_calls: &mut i32,
        tool_calls: &mut i32,
    ) -> std::result::Result<AgentOutput, StageFailure> {
        let metrics = self.capabilities.metrics.as_ref();

        if self.config.has_llm {
            let provider = self.capabilities.llm.as_deref().ok_or_else(|| {
                StageFailure::new(FailureKind::Llm, "no LLM provider")
            })?;
            return llm::run(
                &self.config,
                provider,
                self.capabilities.prompts.as_deref(),
                metrics,
                envelope,
                cancel,
                llm_calls,
            )
            .await;
        }

        let executor = self.capabilities.tools.as_deref().ok_or_else(|| {
            StageFailure::new(FailureKind::Tool, "no tool executor")
        })?;
        tools::run(
            &self.config,
            executor,
            &self.policy,
            metrics,
            envelope,
            cancel,
            tool_calls,
        )
        .await
    }

    fn validate_output(&self, output: &AgentOutput) -> std::result::Result<(), StageFailure> {
        let missing: Vec<&str> = self
            .config
            .required_output_fields
            .iter()
            .filter(|field| !output.contains_key(*field))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(StageFailure::new(
                FailureKind::Validation,
                format!("missing required output fields: {}", missing.join(", ")),
            ));
        }

        if let Some(validator) = &self.output_validator {
            let instance = serde_json::to_value(output)
                .map_err(|e| StageFailure::new(FailureKind::Validation, e.to_string()))?;
            let errors: Vec<String> = validator
                .iter_errors(&instance)
                .take(3)
                .map(|e| e.to_string())
                .collect();
            if !errors.is_empty() {
                return Err(StageFailure::new(
                    FailureKind::Validation,
                    format!("output violates schema: {}", errors.join("; ")),
                ));
            }
        }
        Ok(())
    }
}
