//! Per-agent configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::envelope::ToolAccess;
use crate::types::Error;
use crate::validation::{first_duplicate, validate_non_empty};

/// How a stage with several `requires` dependencies becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinStrategy {
    /// Every required stage has completed.
    #[default]
    All,
    /// At least one required stage has completed.
    Any,
}

/// Ordered condition/value/target triple evaluated against an agent's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoutingRule {
    /// Output field to inspect.
    pub condition: String,
    /// Value the field must equal (JSON equality).
    pub value: Value,
    /// Stage to route to on match.
    pub target: String,
}

impl RoutingRule {
    pub fn new(condition: impl Into<String>, value: impl Into<Value>, target: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            value: value.into(),
            target: target.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Configuration of one agent (one stage of the pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    pub name: String,

    /// Position used to order stages and detect loop-backs.
    #[serde(default)]
    pub stage_order: i32,

    /// Hard dependencies for parallel scheduling.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Soft ordering: run after these stages have finished, successfully or not.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub join_strategy: JoinStrategy,

    #[serde(default)]
    pub has_llm: bool,

    #[serde(default)]
    pub has_tools: bool,

    #[serde(default)]
    pub has_policies: bool,

    #[serde(default)]
    pub tool_access: ToolAccess,

    /// When non-empty, only these tools may be called.
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Key under which output is stored. Defaults to the agent name.
    #[serde(default)]
    pub output_key: String,

    #[serde(default)]
    pub required_output_fields: Vec<String>,

    /// Optional JSON Schema every produced output must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_next: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_next: Option<String>,

    /// Per-attempt deadline, e.g. `"30s"`. Falls back to the runtime default.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_true")]
    pub continue_on_tool_failure: bool,

    /// Route processing through the injected mock handler.
    #[serde(default)]
    pub use_mock: bool,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage_order: 0,
            requires: Vec::new(),
            after: Vec::new(),
            join_strategy: JoinStrategy::All,
            has_llm: false,
            has_tools: false,
            has_policies: false,
            tool_access: ToolAccess::None,
            allowed_tools: Vec::new(),
            model_role: None,
            prompt_key: None,
            temperature: None,
            max_tokens: None,
            output_key: String::new(),
            required_output_fields: Vec::new(),
            output_schema: None,
            routing_rules: Vec::new(),
            default_next: None,
            error_next: None,
            timeout: None,
            max_retries: 0,
            continue_on_tool_failure: true,
            use_mock: false,
        }
    }

    pub fn with_stage_order(mut self, order: i32) -> Self {
        self.stage_order = order;
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_llm(mut self, model_role: impl Into<String>) -> Self {
        self.has_llm = true;
        self.model_role = Some(model_role.into());
        self
    }

    pub fn with_tools(mut self, access: ToolAccess) -> Self {
        self.has_tools = true;
        self.tool_access = access;
        self
    }

    pub fn with_mock(mut self) -> Self {
        self.use_mock = true;
        self
    }

    pub fn requires<I, S>(mut self, stages: I, join: JoinStrategy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = stages.into_iter().map(Into::into).collect();
        self.join_strategy = join;
        self
    }

    pub fn after<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = stages.into_iter().map(Into::into).collect();
        self
    }

    pub fn route(mut self, condition: &str, value: impl Into<Value>, target: &str) -> Self {
        self.routing_rules
            .push(RoutingRule::new(condition, value, target));
        self
    }

    pub fn with_default_next(mut self, stage: impl Into<String>) -> Self {
        self.default_next = Some(stage.into());
        self
    }

    pub fn with_error_next(mut self, stage: impl Into<String>) -> Self {
        self.error_next = Some(stage.into());
        self
    }

    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Key the agent's output is stored under.
    pub fn effective_output_key(&self) -> &str {
        if self.output_key.is_empty() {
            &self.name
        } else {
            &self.output_key
        }
    }

    /// Structural validation of this agent in isolation.
    pub fn validate(&self) -> crate::types::Result<()> {
        validate_non_empty(&self.name, "agent name")?;
        let ctx = |msg: String| Error::validation(format!("agent '{}': {}", self.name, msg));

        if !self.has_tools && self.tool_access != ToolAccess::None {
            return Err(ctx(format!(
                "tool_access {:?} requires has_tools",
                self.tool_access
            )));
        }
        if !self.has_tools && !self.allowed_tools.is_empty() {
            return Err(ctx("allowed_tools requires has_tools".to_string()));
        }
        if !self.has_llm && (self.prompt_key.is_some() || self.temperature.is_some()) {
            return Err(ctx("prompt_key/temperature require has_llm".to_string()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ctx(format!("temperature {} out of range 0..=2", t)));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(ctx("max_tokens must be positive".to_string()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ctx("timeout must be positive".to_string()));
        }

        if let Some(dup) = first_duplicate(self.requires.iter().map(String::as_str)) {
            return Err(ctx(format!("duplicate requires entry '{}'", dup)));
        }
        if self.requires.contains(&self.name) || self.after.contains(&self.name) {
            return Err(ctx("agent cannot depend on itself".to_string()));
        }
        if let Some(dup) = first_duplicate(self.required_output_fields.iter().map(String::as_str))
        {
            return Err(ctx(format!("duplicate required output field '{}'", dup)));
        }

        for (i, rule) in self.routing_rules.iter().enumerate() {
            if rule.condition.trim().is_empty() || rule.target.trim().is_empty() {
                return Err(ctx(format!(
                    "routing rule {} needs both condition and target",
                    i
                )));
            }
        }

        if let Some(schema) = &self.output_schema {
            jsonschema::validator_for(schema)
                .map_err(|e| ctx(format!("invalid output_schema: {}", e)))?;
        }
        Ok(())
    }

    /// Every stage name this agent refers to (routing, dependencies).
    pub fn referenced_stages(&self) -> impl Iterator<Item = &str> {
        self.routing_rules
            .iter()
            .map(|r| r.target.as_str())
            .chain(self.default_next.as_deref())
            .chain(self.error_next.as_deref())
            .chain(self.requires.iter().map(String::as_str))
            .chain(self.after.iter().map(String::as_str))
    }
}
