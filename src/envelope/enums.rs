//! Core enumerations for envelope and runtime.
//!
//! Canonical wire spellings for the state-dict contract.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Why processing terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalReason {
    Completed,
    MaxIterationsExceeded,
    MaxLlmCallsExceeded,
    MaxAgentHopsExceeded,
    MaxStageVisitsExceeded,
    UserCancelled,
    ToolFailedFatally,
    LlmFailedFatally,
    PolicyViolation,
}

impl TerminalReason {
    /// True when the run stopped because a configured bound was hit.
    pub fn is_bound_exhaustion(self) -> bool {
        matches!(
            self,
            TerminalReason::MaxIterationsExceeded
                | TerminalReason::MaxLlmCallsExceeded
                | TerminalReason::MaxAgentHopsExceeded
                | TerminalReason::MaxStageVisitsExceeded
        )
    }
}

/// Interrupt type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Clarification,
    Confirmation,
    AgentReview,
    Checkpoint,
    ResourceExhausted,
    Timeout,
    SystemError,
}

/// Status of a processing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Running,
    Success,
    Error,
    Skipped,
}

/// Tool access level, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    #[default]
    None,
    Read,
    Write,
    All,
}

impl ToolAccess {
    /// Whether an agent holding `self` may run a tool requiring `required`.
    pub fn permits(self, required: ToolAccess) -> bool {
        self != ToolAccess::None && self >= required
    }
}

/// Classification of a failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Llm,
    Tool,
    Hook,
    Parse,
    Timeout,
    Cancelled,
    /// Never dispatched because a required stage failed.
    Dependency,
}

impl FailureKind {
    /// Infrastructure aborted the call (as opposed to the tool/LLM declining).
    pub fn is_infrastructure(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::Cancelled)
    }
}
