//! Envelope - the core state container.
//!
//! The Envelope represents the mutable state of a request as it flows through
//! the multi-agent pipeline. It tracks inputs, outputs, bounds, and interrupts.
//!
//! Fields are organized into semantic sub-structs:
//! - **Identity**: envelope/request/user/session IDs
//! - **Pipeline**: stage sequencing and parallel execution
//! - **Bounds**: resource limits and counters
//! - **InterruptState**: human-in-the-loop flow control
//! - **Execution**: multi-stage goal tracking
//! - **Audit**: processing history, errors, timing, metadata
//!
//! On the wire the sub-structs are flattened, so the serialized envelope is
//! exactly the flat state dict exchanged with other runtimes (see [`export`]
//! and [`import`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::types::{EnvelopeId, Error, RequestId, Result, SessionId, UserId};

pub mod enums;
pub mod export;
pub mod import;
pub mod timestamp;

pub use enums::*;
pub use export::StateDict;

/// Output produced by one agent: field name → dynamic value.
pub type AgentOutput = HashMap<String, Value>;

/// Output keys cleared when a multi-stage run advances to its next stage.
///
/// This is the planner/executor/critic naming convention of the reference
/// pipelines; pipelines using other output keys are unaffected.
pub const STAGE_SCOPED_OUTPUT_KEYS: &[&str] = &["plan", "execution", "critic"];

/// Output keys cleared when a critic loop sends the run back for a retry.
pub const RETRY_SCOPED_OUTPUT_KEYS: &[&str] =
    &["plan", "arbiter", "execution", "synthesizer", "critic"];

pub const GOAL_PENDING: &str = "pending";
pub const GOAL_SATISFIED: &str = "satisfied";

/// Response to a flow interrupt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,

    #[serde(with = "timestamp", default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InterruptResponse {
    fn empty() -> Self {
        Self {
            text: None,
            approved: None,
            decision: None,
            data: None,
            received_at: Utc::now(),
        }
    }

    /// Free-text answer (clarifications).
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::empty()
        }
    }

    /// Yes/no answer (confirmations).
    pub fn approval(approved: bool) -> Self {
        Self {
            approved: Some(approved),
            ..Self::empty()
        }
    }

    /// Named decision (agent reviews).
    pub fn decision(decision: impl Into<String>) -> Self {
        Self {
            decision: Some(decision.into()),
            ..Self::empty()
        }
    }

    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = Some(data);
        self
    }
}

/// Flow interrupt (clarification, confirmation, etc.).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowInterrupt {
    pub kind: InterruptKind,
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<InterruptResponse>,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl FlowInterrupt {
    pub fn new(kind: InterruptKind) -> Self {
        Self {
            kind,
            id: format!("int_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]),
            question: None,
            message: None,
            data: None,
            response: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_question(mut self, q: impl Into<String>) -> Self {
        self.question = Some(q.into());
        self
    }

    pub fn with_message(mut self, m: impl Into<String>) -> Self {
        self.message = Some(m.into());
        self
    }

    pub fn with_data(mut self, d: HashMap<String, Value>) -> Self {
        self.data = Some(d);
        self
    }

    pub fn with_expiry(mut self, duration: std::time::Duration) -> Self {
        self.expires_at =
            Some(Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Processing record for audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingRecord {
    pub agent: String,
    pub stage_order: i32,

    #[serde(with = "timestamp")]
    pub started_at: DateTime<Utc>,

    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    pub duration_ms: i64,
    pub status: ProcessingStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub llm_calls: i32,
}

/// One failed stage, surfaced to callers through `audit.errors`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageError {
    pub stage: String,
    pub agent: String,
    pub kind: FailureKind,
    pub message: String,

    #[serde(with = "timestamp")]
    pub occurred_at: DateTime<Utc>,
}

/// Snapshot appended when a multi-stage run advances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSnapshot {
    pub stage_number: i32,
    pub satisfied_goals: Vec<String>,
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

/// Non-mutating bounds report (see [`Envelope::check_bounds`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundsCheck {
    pub can_continue: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,

    pub llm_calls_remaining: i32,
    pub agent_hops_remaining: i32,
    pub iterations_remaining: i32,
}

// =============================================================================
// Sub-structs
// =============================================================================

/// Envelope identity fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub envelope_id: EnvelopeId,
    pub request_id: RequestId,
    pub user_id: UserId,
    pub session_id: SessionId,
}

/// Pipeline sequencing and parallel execution state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub current_stage: String,

    #[serde(default)]
    pub stage_order: Vec<String>,

    pub iteration: i32,
    pub max_iterations: i32,

    #[serde(default)]
    pub active_stages: HashSet<String>,

    #[serde(default)]
    pub completed_stage_set: HashSet<String>,

    /// stage → error message
    #[serde(default)]
    pub failed_stages: HashMap<String, String>,

    #[serde(default)]
    pub parallel_mode: bool,

    /// "from->to" → number of times that transition was taken
    #[serde(default)]
    pub edge_traversals: HashMap<String, i32>,
}

/// Resource limits and usage counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub llm_call_count: i32,
    pub max_llm_calls: i32,

    #[serde(default)]
    pub tool_call_count: i32,

    pub agent_hop_count: i32,
    pub max_agent_hops: i32,

    #[serde(default)]
    pub tokens_in: i64,

    #[serde(default)]
    pub tokens_out: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,

    #[serde(default)]
    pub terminated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

/// Human-in-the-loop interrupt state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptState {
    #[serde(default)]
    pub interrupt_pending: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<FlowInterrupt>,
}

/// Multi-stage execution tracking (goals, retries).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    #[serde(default)]
    pub completed_stages: Vec<StageSnapshot>,

    pub current_stage_number: i32,
    pub max_stages: i32,

    #[serde(default)]
    pub all_goals: Vec<String>,

    #[serde(default)]
    pub remaining_goals: Vec<String>,

    #[serde(default)]
    pub goal_completion_status: HashMap<String, String>,

    #[serde(default)]
    pub prior_plans: Vec<AgentOutput>,

    #[serde(default)]
    pub loop_feedback: Vec<String>,
}

/// Audit trail: history, errors, timing, metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Audit {
    #[serde(default)]
    pub processing_history: Vec<ProcessingRecord>,

    #[serde(default)]
    pub errors: Vec<StageError>,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

// =============================================================================
// Envelope
// =============================================================================

/// Main envelope structure.
///
/// Unlike hardcoded per-agent output fields, Envelope uses a dynamic `outputs`
/// map where any agent can write results under its output key.
///
/// The envelope owns all of its data (no shared pointers), so `clone()` is a
/// fully independent deep copy suitable for checkpoints and parallel workers.
///
/// Example (pseudo-code):
/// ```ignore
/// envelope.set_output("perception", {...});
/// envelope.set_output("intent", {...});
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(flatten)]
    pub identity: Identity,

    #[serde(default)]
    pub raw_input: String,

    #[serde(with = "timestamp")]
    pub received_at: DateTime<Utc>,

    /// Outputs from agents: map[output_key] = map[field] = value
    #[serde(default)]
    pub outputs: HashMap<String, AgentOutput>,

    #[serde(flatten)]
    pub pipeline: Pipeline,

    #[serde(flatten)]
    pub bounds: Bounds,

    #[serde(flatten)]
    pub interrupts: InterruptState,

    #[serde(flatten)]
    pub execution: Execution,

    #[serde(flatten)]
    pub audit: Audit,
}

impl Envelope {
    /// Create a new envelope with default values.
    pub fn new() -> Self {
        let now = Utc::now();

        Self {
            identity: Identity {
                envelope_id: EnvelopeId::new(),
                request_id: RequestId::new(),
                user_id: UserId::must("anonymous"),
                session_id: SessionId::new(),
            },

            raw_input: String::new(),
            received_at: now,
            outputs: HashMap::new(),

            pipeline: Pipeline {
                current_stage: String::new(),
                stage_order: Vec::new(),
                iteration: 0,
                max_iterations: 3,
                active_stages: HashSet::new(),
                completed_stage_set: HashSet::new(),
                failed_stages: HashMap::new(),
                parallel_mode: false,
                edge_traversals: HashMap::new(),
            },

            bounds: Bounds {
                llm_call_count: 0,
                max_llm_calls: 10,
                tool_call_count: 0,
                agent_hop_count: 0,
                max_agent_hops: 21,
                tokens_in: 0,
                tokens_out: 0,
                terminal_reason: None,
                terminated: false,
                termination_reason: None,
            },

            interrupts: InterruptState {
                interrupt_pending: false,
                interrupt: None,
            },

            execution: Execution {
                completed_stages: Vec::new(),
                current_stage_number: 1,
                max_stages: 5,
                all_goals: Vec::new(),
                remaining_goals: Vec::new(),
                goal_completion_status: HashMap::new(),
                prior_plans: Vec::new(),
                loop_feedback: Vec::new(),
            },

            audit: Audit {
                processing_history: Vec::new(),
                errors: Vec::new(),
                created_at: now,
                completed_at: None,
                metadata: HashMap::new(),
            },
        }
    }

    /// Create an envelope for a raw user request.
    pub fn with_input(raw_input: impl Into<String>) -> Self {
        let mut env = Self::new();
        env.raw_input = raw_input.into();
        env
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    pub fn set_output(&mut self, key: impl Into<String>, value: AgentOutput) {
        self.outputs.insert(key.into(), value);
    }

    pub fn get_output(&self, key: &str) -> Option<&AgentOutput> {
        self.outputs.get(key)
    }

    pub fn has_output(&self, key: &str) -> bool {
        self.outputs.contains_key(key)
    }

    // =========================================================================
    // Processing records
    // =========================================================================

    /// Append a running record for `agent` and count the hop.
    pub fn record_agent_start(&mut self, agent: &str, stage_order: i32) {
        self.audit.processing_history.push(ProcessingRecord {
            agent: agent.to_string(),
            stage_order,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            status: ProcessingStatus::Running,
            error: None,
            llm_calls: 0,
        });
        self.bounds.agent_hop_count += 1;
    }

    /// Finalize the most recent running record of `agent`.
    ///
    /// LLM calls are always added to the envelope counter; the return value
    /// reports whether a running record was found.
    pub fn record_agent_complete(
        &mut self,
        agent: &str,
        status: ProcessingStatus,
        error: Option<String>,
        llm_calls: i32,
        duration_ms: i64,
    ) -> bool {
        self.bounds.llm_call_count += llm_calls.max(0);

        let record = self
            .audit
            .processing_history
            .iter_mut()
            .rev()
            .find(|r| r.agent == agent && r.status == ProcessingStatus::Running);

        match record {
            Some(record) => {
                record.status = status;
                record.error = error;
                record.llm_calls = llm_calls;
                record.duration_ms = duration_ms;
                record.completed_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Add processing record to history.
    pub fn add_processing_record(&mut self, record: ProcessingRecord) {
        self.audit.processing_history.push(record);
    }

    pub fn add_error(&mut self, error: StageError) {
        self.audit.errors.push(error);
    }

    // =========================================================================
    // Bounds
    // =========================================================================

    /// Whether the run may dispatch another stage.
    ///
    /// Checks are evaluated in a fixed order and the first failing one wins:
    /// terminated, interrupt pending, iterations, LLM calls, agent hops.
    /// Exhausting a bound moves the envelope into its terminal state.
    pub fn can_continue(&mut self) -> bool {
        if self.bounds.terminated {
            return false;
        }
        if self.interrupts.interrupt_pending {
            return false;
        }
        match self.exceeded_bound() {
            Some(reason) => {
                self.terminate_with(reason, format!("bounds exceeded: {:?}", reason));
                false
            }
            None => true,
        }
    }

    /// Report bounds without mutating the envelope.
    pub fn check_bounds(&self) -> BoundsCheck {
        let terminal_reason = if self.bounds.terminated {
            self.bounds.terminal_reason
        } else {
            self.exceeded_bound()
        };
        BoundsCheck {
            can_continue: !self.bounds.terminated
                && !self.interrupts.interrupt_pending
                && terminal_reason.is_none(),
            terminal_reason,
            llm_calls_remaining: (self.bounds.max_llm_calls - self.bounds.llm_call_count).max(0),
            agent_hops_remaining: (self.bounds.max_agent_hops - self.bounds.agent_hop_count)
                .max(0),
            iterations_remaining: (self.pipeline.max_iterations - self.pipeline.iteration).max(0),
        }
    }

    fn exceeded_bound(&self) -> Option<TerminalReason> {
        if self.pipeline.iteration > self.pipeline.max_iterations {
            return Some(TerminalReason::MaxIterationsExceeded);
        }
        if self.bounds.llm_call_count >= self.bounds.max_llm_calls {
            return Some(TerminalReason::MaxLlmCallsExceeded);
        }
        if self.bounds.agent_hop_count >= self.bounds.max_agent_hops {
            return Some(TerminalReason::MaxAgentHopsExceeded);
        }
        None
    }

    /// Check if at any bound limit.
    pub fn at_limit(&self) -> bool {
        self.bounds.llm_call_count >= self.bounds.max_llm_calls
            || self.bounds.agent_hop_count >= self.bounds.max_agent_hops
    }

    /// Increment LLM call counter.
    pub fn increment_llm_calls(&mut self, count: i32) {
        self.bounds.llm_call_count += count.max(0);
    }

    /// Increment agent hop counter.
    pub fn increment_agent_hops(&mut self) {
        self.bounds.agent_hop_count += 1;
    }

    pub fn increment_tool_calls(&mut self, count: i32) {
        self.bounds.tool_call_count += count.max(0);
    }

    /// Terminate envelope with reason.
    pub fn terminate(&mut self, reason: impl Into<String>) {
        self.bounds.terminated = true;
        self.bounds.termination_reason = Some(reason.into());
        self.audit.completed_at = Some(Utc::now());
    }

    /// Terminate envelope recording a typed terminal reason.
    pub fn terminate_with(&mut self, reason: TerminalReason, message: impl Into<String>) {
        self.bounds.terminal_reason = Some(reason);
        self.terminate(message);
    }

    // =========================================================================
    // Interrupts
    // =========================================================================

    /// Set interrupt pending. The slot holds one interrupt; a new one replaces
    /// any previous interrupt.
    pub fn set_interrupt(&mut self, interrupt: FlowInterrupt) {
        self.interrupts.interrupt_pending = true;
        self.interrupts.interrupt = Some(interrupt);
    }

    /// Attach a response to the current interrupt and clear the pending flag.
    /// The interrupt itself is kept for audit.
    pub fn resolve_interrupt(&mut self, mut response: InterruptResponse) -> Result<()> {
        let interrupt = self
            .interrupts
            .interrupt
            .as_mut()
            .ok_or_else(|| Error::state_transition("no interrupt to resolve"))?;

        response.received_at = Utc::now();
        interrupt.response = Some(response);
        self.interrupts.interrupt_pending = false;
        Ok(())
    }

    /// Clear interrupt.
    pub fn clear_interrupt(&mut self) {
        self.interrupts.interrupt_pending = false;
        self.interrupts.interrupt = None;
    }

    // =========================================================================
    // Stage sets
    // =========================================================================

    /// Start a stage (mark as actively executing).
    pub fn start_stage(&mut self, stage_name: &str) {
        self.pipeline.completed_stage_set.remove(stage_name);
        self.pipeline.failed_stages.remove(stage_name);
        self.pipeline.active_stages.insert(stage_name.to_string());
    }

    /// Complete a stage successfully.
    pub fn complete_stage(&mut self, stage_name: &str) {
        self.pipeline.active_stages.remove(stage_name);
        self.pipeline.failed_stages.remove(stage_name);
        self.pipeline
            .completed_stage_set
            .insert(stage_name.to_string());
    }

    /// Mark a stage as failed.
    pub fn fail_stage(&mut self, stage_name: &str, error_msg: impl Into<String>) {
        self.pipeline.active_stages.remove(stage_name);
        self.pipeline.completed_stage_set.remove(stage_name);
        self.pipeline
            .failed_stages
            .insert(stage_name.to_string(), error_msg.into());
    }

    /// Drop a stage from every status set so it can be dispatched again.
    pub fn reset_stage(&mut self, stage_name: &str) {
        self.pipeline.active_stages.remove(stage_name);
        self.pipeline.completed_stage_set.remove(stage_name);
        self.pipeline.failed_stages.remove(stage_name);
    }

    /// Check if a stage is completed.
    pub fn is_stage_completed(&self, stage_name: &str) -> bool {
        self.pipeline.completed_stage_set.contains(stage_name)
    }

    /// Check if a stage failed.
    pub fn is_stage_failed(&self, stage_name: &str) -> bool {
        self.pipeline.failed_stages.contains_key(stage_name)
    }

    pub fn is_stage_active(&self, stage_name: &str) -> bool {
        self.pipeline.active_stages.contains(stage_name)
    }

    // =========================================================================
    // Goals and retries
    // =========================================================================

    /// Seed the goal set for a multi-stage run; every goal starts pending.
    pub fn initialize_goals(&mut self, goals: Vec<String>) {
        self.execution.goal_completion_status = goals
            .iter()
            .map(|g| (g.clone(), GOAL_PENDING.to_string()))
            .collect();
        self.execution.remaining_goals = goals.clone();
        self.execution.all_goals = goals;
    }

    /// Record satisfied goals and move to the next stage of a multi-stage run.
    ///
    /// Returns false when no goals remain or the stage budget is spent; in
    /// that case outputs are left in place.
    pub fn advance_stage(&mut self, satisfied_goals: &[String], summary: impl Into<String>) -> bool {
        for goal in satisfied_goals {
            self.execution
                .goal_completion_status
                .insert(goal.clone(), GOAL_SATISFIED.to_string());
            self.execution.remaining_goals.retain(|g| g != goal);
        }

        let plan_id = self
            .outputs
            .get("plan")
            .and_then(|plan| plan.get("plan_id"))
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            });

        self.execution.completed_stages.push(StageSnapshot {
            stage_number: self.execution.current_stage_number,
            satisfied_goals: satisfied_goals.to_vec(),
            summary: summary.into(),
            plan_id,
        });

        if self.execution.remaining_goals.is_empty()
            || self.execution.current_stage_number >= self.execution.max_stages
        {
            return false;
        }

        self.execution.current_stage_number += 1;
        for key in STAGE_SCOPED_OUTPUT_KEYS {
            self.outputs.remove(*key);
        }
        true
    }

    /// Start another retry iteration, archiving the current plan.
    pub fn increment_iteration(&mut self, feedback: Option<String>) {
        self.pipeline.iteration += 1;
        if let Some(feedback) = feedback {
            self.execution.loop_feedback.push(feedback);
        }
        if let Some(plan) = self.outputs.get("plan") {
            self.execution.prior_plans.push(plan.clone());
        }
        for key in RETRY_SCOPED_OUTPUT_KEYS {
            self.outputs.remove(*key);
        }
    }

    // =========================================================================
    // Updates and serialization
    // =========================================================================

    /// Merge key-value updates into the envelope.
    ///
    /// Supports updating well-known fields: `raw_input`, `metadata` (merged into
    /// `audit.metadata`), and `outputs` (merged into `outputs`). Unknown keys
    /// are stored in `audit.metadata` as a catch-all.
    pub fn merge_updates(&mut self, updates: HashMap<String, Value>) {
        for (key, value) in updates {
            match key.as_str() {
                "raw_input" => {
                    if let Some(s) = value.as_str() {
                        self.raw_input = s.to_string();
                    }
                }
                "metadata" => {
                    if let Value::Object(map) = value {
                        self.audit.metadata.extend(map);
                    }
                }
                "outputs" => {
                    if let Ok(output_map) =
                        serde_json::from_value::<HashMap<String, AgentOutput>>(value)
                    {
                        for (key, output) in output_map {
                            self.outputs.entry(key).or_default().extend(output);
                        }
                    }
                }
                _ => {
                    self.audit.metadata.insert(key, value);
                }
            }
        }
    }

    /// Flat state dict (the persistence/wire contract).
    pub fn to_state_dict(&self) -> Result<StateDict> {
        export::to_state_dict(self)
    }

    /// Rebuild an envelope from a state dict produced by any runtime.
    pub fn from_state_dict(state: StateDict) -> Result<Self> {
        import::from_state_dict(state)
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
