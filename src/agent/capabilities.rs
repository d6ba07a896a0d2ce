//! Collaborators injected into agents: LLM provider, tool executor, prompt
//! registry, event sink and metrics collector.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{EventContext, NoopEventContext};
use crate::observability::{MetricsCollector, NoopMetrics};
use crate::tools::ToolExecutor;

/// Failure reported by an LLM provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider rate limited: {0}")]
    RateLimited(String),

    #[error("provider call cancelled")]
    Cancelled,

    #[error("provider call timed out")]
    Timeout,
}

impl ProviderError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ProviderError::Cancelled | ProviderError::Timeout)
    }
}

/// Sampling options forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Text generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for `prompt` using the model bound to `role`.
    async fn generate(
        &self,
        role: &str,
        prompt: &str,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError>;
}

/// Prompt lookup by key with a render context.
pub trait PromptRegistry: Send + Sync {
    fn get(&self, key: &str, context: &HashMap<String, Value>) -> Option<String>;
}

/// In-memory registry of `{placeholder}` templates.
///
/// Placeholders are replaced by the matching context value: strings verbatim,
/// anything else as compact JSON. Unknown placeholders are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TemplatePromptRegistry {
    templates: HashMap<String, String>,
}

impl TemplatePromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(key.into(), template.into());
        self
    }
}

impl PromptRegistry for TemplatePromptRegistry {
    fn get(&self, key: &str, context: &HashMap<String, Value>) -> Option<String> {
        let template = self.templates.get(key)?;
        let mut rendered = template.clone();
        for (name, value) in context {
            let placeholder = format!("{{{}}}", name);
            if rendered.contains(&placeholder) {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                rendered = rendered.replace(&placeholder, &text);
            }
        }
        Some(rendered)
    }
}

/// Everything an agent may call out to. Resolved once at construction.
#[derive(Clone)]
pub struct AgentCapabilities {
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub tools: Option<Arc<dyn ToolExecutor>>,
    pub prompts: Option<Arc<dyn PromptRegistry>>,
    pub events: Arc<dyn EventContext>,
    pub metrics: Arc<dyn MetricsCollector>,
}

impl AgentCapabilities {
    pub fn new() -> Self {
        Self {
            llm: None,
            tools: None,
            prompts: None,
            events: Arc::new(NoopEventContext),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptRegistry>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventContext>) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AgentCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCapabilities")
            .field("llm", &self.llm.is_some())
            .field("tools", &self.tools.is_some())
            .field("prompts", &self.prompts.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_rendering() {
        let registry = TemplatePromptRegistry::new()
            .with_template("planner", "Plan for: {raw_input}\nContext: {intent} {missing}");
        let context: HashMap<String, Value> = [
            ("raw_input".to_string(), json!("book a flight")),
            ("intent".to_string(), json!({"goal": "travel"})),
        ]
        .into_iter()
        .collect();

        let prompt = registry.get("planner", &context).unwrap();
        assert_eq!(
            prompt,
            "Plan for: book a flight\nContext: {\"goal\":\"travel\"} {missing}"
        );
        assert!(registry.get("critic", &context).is_none());
    }

    #[test]
    fn test_provider_error_classification() {
        assert!(ProviderError::Timeout.is_infrastructure());
        assert!(!ProviderError::RateLimited("429".into()).is_infrastructure());
    }
}
