//! Per-agent hooks: pre/post processing and the mock handler.

use std::fmt;
use std::sync::Arc;

use crate::envelope::{AgentOutput, Envelope};
use crate::types::Result;

/// Runs before main processing. May mutate the envelope or abort the stage.
/// Receives the agent name.
pub type PreProcessHook = Arc<dyn Fn(&mut Envelope, &str) -> Result<()> + Send + Sync>;

/// Runs after the output is stored. May mutate the envelope (e.g. raise an
/// interrupt) or reject the output.
pub type PostProcessHook =
    Arc<dyn Fn(&mut Envelope, &AgentOutput, &str) -> Result<()> + Send + Sync>;

/// Replaces main processing entirely when the agent has `use_mock` set.
pub type MockHandler = Arc<dyn Fn(&mut Envelope) -> Result<AgentOutput> + Send + Sync>;

/// Optional hooks for one agent.
#[derive(Clone, Default)]
pub struct AgentHooks {
    pub pre_process: Option<PreProcessHook>,
    pub post_process: Option<PostProcessHook>,
    pub mock_handler: Option<MockHandler>,
}

impl AgentHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre_process<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Envelope, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.pre_process = Some(Arc::new(hook));
        self
    }

    pub fn with_post_process<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Envelope, &AgentOutput, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.post_process = Some(Arc::new(hook));
        self
    }

    pub fn with_mock<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Envelope) -> Result<AgentOutput> + Send + Sync + 'static,
    {
        self.mock_handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for AgentHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHooks")
            .field("pre_process", &self.pre_process.is_some())
            .field("post_process", &self.post_process.is_some())
            .field("mock_handler", &self.mock_handler.is_some())
            .finish()
    }
}
