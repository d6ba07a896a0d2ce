//! Tool infrastructure - the executor seam and access control.
//!
//! Concrete tools live outside the engine. Agents in tool mode call them
//! through an injected [`ToolExecutor`], after checking the agent's
//! [`ToolAccessPolicy`].

pub mod access;

pub use access::{AccessDecision, ToolAccessPolicy};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a tool executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool call cancelled")]
    Cancelled,

    #[error("tool call timed out")]
    Timeout,
}

impl ToolError {
    /// True when infrastructure aborted the call (not the tool declining).
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ToolError::Cancelled | ToolError::Timeout)
    }
}

/// Executes named tools with structured parameters.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `tool_name`. Implementations should stop early once `cancel` fires.
    async fn execute(
        &self,
        tool_name: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError>;
}
