//! Pipeline runtime - schedules agents against an envelope.
//!
//! The Runtime:
//!   - Builds every agent of a validated pipeline up front
//!   - Drives the envelope sequentially (routing) or in parallel rounds (dependencies)
//!   - Enforces global bounds and per-edge traversal limits
//!   - Pauses on interrupts and resumes from the configured stage
//!   - Optionally streams per-stage results
//!
//! Agents decide *where* to go next; the runtime decides *whether* to go.

pub mod edges;
mod parallel;
mod sequential;
mod stream;

pub use stream::{StageOutput, StreamEvent};

use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::{Agent, AgentCapabilities, AgentHooks, AgentOutcome};
use crate::envelope::{Envelope, InterruptResponse, TerminalReason};
use crate::observability::MetricsCollector;
use crate::pipeline::{PipelineConfig, RunMode, END_STAGE};
use crate::types::{Config, DefaultLimits, Error, Result, RuntimeSettings};
use stream::Emitter;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Routed to the end stage or ran out of ready stages.
    Completed,
    /// Stopped by a bound or an edge limit.
    Terminated,
    /// Paused on a pending interrupt.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,
    /// Stages dispatched by this call.
    pub stages_run: usize,
}

impl RunOutcome {
    fn from_envelope(envelope: &Envelope, stages_run: usize) -> Self {
        let status = if envelope.interrupts.interrupt_pending {
            RunStatus::Interrupted
        } else if envelope.bounds.terminal_reason == Some(TerminalReason::Completed) {
            RunStatus::Completed
        } else {
            RunStatus::Terminated
        };
        Self {
            status,
            terminal_reason: envelope.bounds.terminal_reason,
            stages_run,
        }
    }
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    pipeline: PipelineConfig,
    capabilities: AgentCapabilities,
    hooks: HashMap<String, AgentHooks>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    limits: DefaultLimits,
    settings: RuntimeSettings,
}

impl RuntimeBuilder {
    pub fn new(pipeline: PipelineConfig) -> Self {
        Self {
            pipeline,
            capabilities: AgentCapabilities::default(),
            hooks: HashMap::new(),
            metrics: None,
            limits: DefaultLimits::default(),
            settings: RuntimeSettings::default(),
        }
    }

    /// Capabilities shared by every agent.
    pub fn with_capabilities(mut self, capabilities: AgentCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Hooks for the agent named `agent`.
    pub fn with_hooks(mut self, agent: impl Into<String>, hooks: AgentHooks) -> Self {
        self.hooks.insert(agent.into(), hooks);
        self
    }

    /// Collector used by the runtime and, unless overridden, by every agent.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Take default limits and scheduler settings from the global config.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.limits = config.defaults.clone();
        self.settings = config.runtime.clone();
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validate the pipeline and construct every agent.
    pub fn build(mut self) -> Result<Runtime> {
        self.pipeline.validate()?;

        if let Some(unknown) = self
            .hooks
            .keys()
            .find(|name| self.pipeline.get_agent(name.as_str()).is_none())
        {
            return Err(Error::config(format!(
                "hooks registered for unknown agent '{}'",
                unknown
            )));
        }

        let metrics = self
            .metrics
            .unwrap_or_else(|| self.capabilities.metrics.clone());
        let capabilities = self.capabilities.with_metrics(metrics.clone());

        let mut agents = HashMap::with_capacity(self.pipeline.agents.len());
        for config in &self.pipeline.agents {
            let hooks = self.hooks.remove(&config.name).unwrap_or_default();
            let agent = Agent::new(config.clone(), capabilities.clone(), hooks)?
                .with_default_timeout(self.limits.agent_timeout);
            agents.insert(config.name.clone(), Arc::new(agent));
        }

        info!(
            pipeline = %self.pipeline.name,
            agents = agents.len(),
            "runtime built"
        );

        Ok(Runtime {
            pipeline: Arc::new(self.pipeline),
            agents: Arc::new(agents),
            metrics,
            limits: Arc::new(self.limits),
            settings: Arc::new(self.settings),
        })
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("pipeline", &self.pipeline.name)
            .field("capabilities", &self.capabilities)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Executes one pipeline. Cheap to clone; clones share the built agents.
#[derive(Clone)]
pub struct Runtime {
    pipeline: Arc<PipelineConfig>,
    agents: Arc<HashMap<String, Arc<Agent>>>,
    metrics: Arc<dyn MetricsCollector>,
    limits: Arc<DefaultLimits>,
    settings: Arc<RuntimeSettings>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pipeline", &self.pipeline.name)
            .field("agents", &self.pipeline.get_stage_order())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn builder(pipeline: PipelineConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(pipeline)
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name).map(Arc::as_ref)
    }

    pub(crate) fn agent_handle(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    /// Limit for `from -> to`: the pipeline's, else the global default.
    pub fn edge_limit(&self, from: &str, to: &str) -> i32 {
        match self.pipeline.get_edge_limit(from, to) {
            0 => self.limits.default_edge_limit.max(0),
            limit => limit,
        }
    }

    /// Bind a fresh envelope to this pipeline: stage order, bounds and the
    /// first stage. Envelopes that already carry a stage order are left as is.
    ///
    /// Bounds the pipeline leaves unset come from the configured defaults.
    pub fn prepare(&self, envelope: &mut Envelope) {
        if !envelope.pipeline.stage_order.is_empty() {
            return;
        }
        envelope.pipeline.stage_order = self.pipeline.get_stage_order();
        envelope.pipeline.max_iterations = self
            .pipeline
            .max_iterations
            .unwrap_or(self.limits.max_iterations);
        envelope.bounds.max_llm_calls = self
            .pipeline
            .max_llm_calls
            .unwrap_or(self.limits.max_llm_calls);
        envelope.bounds.max_agent_hops = self
            .pipeline
            .max_agent_hops
            .unwrap_or(self.limits.max_agent_hops);
        if envelope.pipeline.current_stage.is_empty() {
            if let Some(first) = envelope.pipeline.stage_order.first() {
                envelope.pipeline.current_stage = first.clone();
            }
        }
    }

    /// Run with the pipeline's default mode.
    pub async fn execute(
        &self,
        envelope: &mut Envelope,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        self.execute_with_mode(envelope, self.pipeline.default_run_mode, cancel)
            .await
    }

    pub async fn execute_with_mode(
        &self,
        envelope: &mut Envelope,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        self.run(envelope, mode, cancel, &mut Emitter::none()).await
    }

    /// Run in the background and stream each finished stage, closed by a
    /// [`StreamEvent::Finished`] sentinel.
    pub fn execute_stream(
        &self,
        envelope: Envelope,
        cancel: CancellationToken,
    ) -> BoxStream<'static, StreamEvent> {
        self.execute_stream_with_mode(envelope, self.pipeline.default_run_mode, cancel)
    }

    pub fn execute_stream_with_mode(
        &self,
        mut envelope: Envelope,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> BoxStream<'static, StreamEvent> {
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let runtime = self.clone();

        tokio::spawn(async move {
            let mut emitter = Emitter::channel(tx);
            let result = runtime.run(&mut envelope, mode, &cancel, &mut emitter).await;
            let (outcome, error) = match result {
                Ok(outcome) => (Some(outcome), None),
                Err(e) => (None, Some(e.to_string())),
            };
            emitter
                .finish(StreamEvent::Finished {
                    envelope: Box::new(envelope),
                    outcome,
                    error,
                })
                .await;
        });

        rx.boxed()
    }

    /// Resolve the pending interrupt and continue from the stage configured
    /// for its kind.
    ///
    /// The run continues in the mode the envelope was paused in. The envelope
    /// is left untouched when there is nothing to resume or no resume stage is
    /// configured.
    pub async fn resume(
        &self,
        envelope: &mut Envelope,
        response: InterruptResponse,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let kind = match &envelope.interrupts.interrupt {
            Some(interrupt) if envelope.interrupts.interrupt_pending => interrupt.kind,
            _ => return Err(Error::state_transition("no pending interrupt to resume")),
        };
        let stage = self
            .pipeline
            .resume_stages
            .for_kind(kind)
            .ok_or_else(|| {
                Error::config(format!(
                    "pipeline '{}' has no resume stage for {:?} interrupts",
                    self.pipeline.name, kind
                ))
            })?
            .to_string();

        envelope.resolve_interrupt(response)?;
        envelope.reset_stage(&stage);
        info!(stage = %stage, ?kind, "resuming after interrupt");
        envelope.pipeline.current_stage = stage;
        let mode = if envelope.pipeline.parallel_mode {
            RunMode::Parallel
        } else {
            RunMode::Sequential
        };
        self.execute_with_mode(envelope, mode, cancel).await
    }

    /// Run one agent outside the scheduling loop. No routing is applied.
    pub async fn execute_agent(
        &self,
        name: &str,
        envelope: &mut Envelope,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        let agent = self
            .agent(name)
            .ok_or_else(|| Error::not_found(format!("agent '{}' not in pipeline", name)))?;
        self.prepare(envelope);

        envelope.start_stage(name);
        let outcome = agent.process(envelope, cancel).await;
        match &outcome.failure {
            None => envelope.complete_stage(name),
            Some(failure) => envelope.fail_stage(name, failure.message.clone()),
        }
        if outcome.is_cancelled() {
            return Err(Error::cancelled(format!("agent '{}' cancelled", name)));
        }
        Ok(outcome)
    }

    async fn run(
        &self,
        envelope: &mut Envelope,
        mode: RunMode,
        cancel: &CancellationToken,
        emitter: &mut Emitter,
    ) -> Result<RunOutcome> {
        self.prepare(envelope);
        let span = info_span!(
            "pipeline",
            pipeline = %self.pipeline.name,
            envelope_id = %envelope.identity.envelope_id,
            ?mode,
        );

        async {
            let stages_run = match mode {
                RunMode::Sequential => sequential::run(self, envelope, cancel, emitter).await?,
                RunMode::Parallel => parallel::run(self, envelope, cancel, emitter).await?,
            };
            let outcome = RunOutcome::from_envelope(envelope, stages_run);
            if outcome.status != RunStatus::Interrupted {
                self.metrics
                    .pipeline_finished(&self.pipeline.name, outcome.terminal_reason);
            }
            info!(
                status = ?outcome.status,
                terminal_reason = ?outcome.terminal_reason,
                stages_run,
                "pipeline run finished"
            );
            Ok::<_, Error>(outcome)
        }
        .instrument(span)
        .await
    }

    /// Apply a routing decision from `from` to `requested`.
    pub(crate) fn route(&self, envelope: &mut Envelope, from: &str, requested: &str) {
        if requested == END_STAGE {
            envelope.pipeline.current_stage = END_STAGE.to_string();
            self.complete_run(envelope);
            return;
        }

        let limit = self.edge_limit(from, requested);
        if !edges::record_traversal(envelope, from, requested, limit) {
            warn!(from, to = requested, limit, "edge limit exceeded, ending run");
            envelope.pipeline.current_stage = END_STAGE.to_string();
            envelope.terminate_with(
                TerminalReason::MaxStageVisitsExceeded,
                format!("edge {}->{} exceeded limit {}", from, requested, limit),
            );
            return;
        }

        if edges::is_loop_back(&envelope.pipeline.stage_order, from, requested) {
            envelope.pipeline.iteration += 1;
        }
        envelope.pipeline.current_stage = requested.to_string();
    }

    pub(crate) fn complete_run(&self, envelope: &mut Envelope) {
        envelope.terminate_with(TerminalReason::Completed, "pipeline completed");
    }

    /// Terminate a cancelled run and build the error returned to the caller.
    pub(crate) fn cancel_run(&self, envelope: &mut Envelope) -> Error {
        warn!("pipeline run cancelled");
        envelope.terminate_with(TerminalReason::UserCancelled, "run cancelled");
        self.metrics
            .pipeline_finished(&self.pipeline.name, Some(TerminalReason::UserCancelled));
        Error::cancelled(format!("pipeline '{}' cancelled", self.pipeline.name))
    }
}
