//! Pipeline definition: ordered agents, bounds, edge limits, resume stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::agent_config::{AgentConfig, JoinStrategy};
use super::END_STAGE;
use crate::envelope::InterruptKind;
use crate::types::{Error, Result};
use crate::validation::{
    first_duplicate, validate_non_empty, validate_non_negative, validate_positive,
};

/// How `Runtime::execute` schedules stages by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Sequential,
    Parallel,
}

/// Cap on how many times one stage-to-stage transition may be taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EdgeLimit {
    pub from: String,
    pub to: String,
    /// 0 means unlimited.
    pub max_count: i32,
}

/// Stage to resume from, per interrupt kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResumeStages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_review: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}

impl ResumeStages {
    /// Configured resume stage for `kind`, if any.
    pub fn for_kind(&self, kind: InterruptKind) -> Option<&str> {
        match kind {
            InterruptKind::Clarification => self.clarification.as_deref(),
            InterruptKind::Confirmation => self.confirmation.as_deref(),
            InterruptKind::AgentReview => self.agent_review.as_deref(),
            InterruptKind::Checkpoint => self.checkpoint.as_deref(),
            InterruptKind::ResourceExhausted | InterruptKind::Timeout | InterruptKind::SystemError => {
                None
            }
        }
    }

    fn configured(&self) -> impl Iterator<Item = &str> {
        [
            &self.clarification,
            &self.confirmation,
            &self.agent_review,
            &self.checkpoint,
        ]
        .into_iter()
        .filter_map(|s| s.as_deref())
    }
}

/// A complete pipeline definition. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    pub name: String,
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub default_run_mode: RunMode,

    /// Global bounds. Unset values fall back to `Config.defaults`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_llm_calls: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_agent_hops: Option<i32>,

    /// Limit for edges without an explicit entry. 0 means unlimited.
    #[serde(default)]
    pub default_edge_limit: i32,

    #[serde(default)]
    pub edge_limits: Vec<EdgeLimit>,

    #[serde(default)]
    pub resume_stages: ResumeStages,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, agents: Vec<AgentConfig>) -> Self {
        Self {
            name: name.into(),
            agents,
            default_run_mode: RunMode::Sequential,
            max_iterations: None,
            max_llm_calls: None,
            max_agent_hops: None,
            default_edge_limit: 0,
            edge_limits: Vec::new(),
            resume_stages: ResumeStages::default(),
        }
    }

    /// Parse a pipeline definition from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// JSON Schema of the pipeline definition format.
    pub fn json_schema() -> Value {
        serde_json::to_value(schemars::schema_for!(PipelineConfig)).unwrap_or(Value::Null)
    }

    pub fn with_edge_limit(mut self, from: &str, to: &str, max_count: i32) -> Self {
        self.edge_limits.push(EdgeLimit {
            from: from.to_string(),
            to: to.to_string(),
            max_count,
        });
        self
    }

    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.default_run_mode = mode;
        self
    }

    pub fn with_max_llm_calls(mut self, max: i32) -> Self {
        self.max_llm_calls = Some(max);
        self
    }

    pub fn with_max_agent_hops(mut self, max: i32) -> Self {
        self.max_agent_hops = Some(max);
        self
    }

    pub fn with_max_iterations(mut self, max: i32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Validate pipeline configuration.
    pub fn validate(&self) -> Result<()> {
        validate_non_empty(&self.name, "pipeline name")?;
        if self.agents.is_empty() {
            return Err(Error::validation(format!(
                "pipeline '{}' must have at least one agent",
                self.name
            )));
        }
        for (value, field) in [
            (self.max_iterations, "max_iterations"),
            (self.max_llm_calls, "max_llm_calls"),
            (self.max_agent_hops, "max_agent_hops"),
        ] {
            if let Some(value) = value {
                validate_positive(value, field)?;
            }
        }
        validate_non_negative(self.default_edge_limit, "default_edge_limit")?;

        if self.get_agent(END_STAGE).is_some() {
            return Err(Error::validation(format!(
                "agent name '{}' is reserved for pipeline termination",
                END_STAGE
            )));
        }
        if let Some(dup) = first_duplicate(self.agents.iter().map(|a| a.name.as_str())) {
            return Err(Error::validation(format!("duplicate agent name '{}'", dup)));
        }
        if let Some(dup) = first_duplicate(self.agents.iter().map(|a| a.effective_output_key())) {
            return Err(Error::validation(format!("duplicate output key '{}'", dup)));
        }

        let known: HashSet<&str> = self.agents.iter().map(|a| a.name.as_str()).collect();
        let is_known = |stage: &str| stage == END_STAGE || known.contains(stage);

        for agent in &self.agents {
            agent.validate()?;
            if let Some(unknown) = agent.referenced_stages().find(|&s| !is_known(s)) {
                return Err(Error::validation(format!(
                    "agent '{}' references unknown stage '{}'",
                    agent.name, unknown
                )));
            }
        }

        for limit in &self.edge_limits {
            validate_non_negative(limit.max_count, "edge limit max_count")?;
            for stage in [&limit.from, &limit.to] {
                if !is_known(stage.as_str()) {
                    return Err(Error::validation(format!(
                        "edge limit {}->{} references unknown stage '{}'",
                        limit.from, limit.to, stage
                    )));
                }
            }
        }

        if let Some(unknown) = self.resume_stages.configured().find(|s| !known.contains(s)) {
            return Err(Error::validation(format!(
                "resume stage '{}' is not an agent",
                unknown
            )));
        }

        if let Some(stage) = self.dependency_cycle() {
            return Err(Error::validation(format!(
                "dependency cycle through stage '{}'",
                stage
            )));
        }
        Ok(())
    }

    /// Agent names in stage order (declaration order breaks ties).
    pub fn get_stage_order(&self) -> Vec<String> {
        let mut agents: Vec<&AgentConfig> = self.agents.iter().collect();
        agents.sort_by_key(|a| a.stage_order);
        agents.into_iter().map(|a| a.name.clone()).collect()
    }

    pub fn get_agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Limit for the `from -> to` transition, or the pipeline default.
    pub fn get_edge_limit(&self, from: &str, to: &str) -> i32 {
        self.edge_limits
            .iter()
            .find(|l| l.from == from && l.to == to)
            .map(|l| l.max_count)
            .unwrap_or(self.default_edge_limit)
    }

    /// Stages ready to run given only a completed set.
    pub fn get_ready_stages(&self, completed: &HashSet<String>) -> Vec<String> {
        self.ready_stages(completed, &HashSet::new())
    }

    /// Stages that have not finished yet and whose dependencies are satisfied.
    ///
    /// `requires` is satisfied per the agent's join strategy by completed
    /// stages only. `after` is soft: each listed stage must have finished,
    /// successfully or not.
    pub fn ready_stages(&self, completed: &HashSet<String>, failed: &HashSet<String>) -> Vec<String> {
        self.get_stage_order()
            .into_iter()
            .filter_map(|name| self.get_agent(&name))
            .filter(|agent| !completed.contains(&agent.name) && !failed.contains(&agent.name))
            .filter(|agent| {
                let requires_met = match agent.join_strategy {
                    JoinStrategy::All => agent.requires.iter().all(|r| completed.contains(r)),
                    JoinStrategy::Any => {
                        agent.requires.is_empty()
                            || agent.requires.iter().any(|r| completed.contains(r))
                    }
                };
                let after_met = agent
                    .after
                    .iter()
                    .all(|a| completed.contains(a) || failed.contains(a));
                requires_met && after_met
            })
            .map(|agent| agent.name.clone())
            .collect()
    }

    /// First stage found on a `requires`/`after` cycle, if any.
    fn dependency_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            name: &'a str,
            deps: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Option<String> {
            match marks.get(name) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(name.to_string()),
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            for &dep in deps.get(name).into_iter().flatten() {
                if let Some(stage) = visit(dep, deps, marks) {
                    return Some(stage);
                }
            }
            marks.insert(name, Mark::Done);
            None
        }

        let deps: HashMap<&str, Vec<&str>> = self
            .agents
            .iter()
            .map(|a| {
                let edges = a
                    .requires
                    .iter()
                    .chain(a.after.iter())
                    .map(String::as_str)
                    .collect();
                (a.name.as_str(), edges)
            })
            .collect();

        let mut marks = HashMap::new();
        self.agents
            .iter()
            .find_map(|a| visit(a.name.as_str(), &deps, &mut marks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ToolAccess;
    use serde_json::json;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn linear_pipeline() -> PipelineConfig {
        PipelineConfig::new(
            "research",
            vec![
                AgentConfig::new("planner")
                    .with_stage_order(1)
                    .with_default_next("executor"),
                AgentConfig::new("executor")
                    .with_stage_order(2)
                    .with_tools(ToolAccess::Read)
                    .with_default_next("critic"),
                AgentConfig::new("critic")
                    .with_stage_order(3)
                    .route("verdict", "loop_back", "planner")
                    .with_default_next(END_STAGE),
            ],
        )
    }

    // ── 1. Validation ───────────────────────────────────────────────────

    #[test]
    fn test_valid_pipeline() {
        assert!(linear_pipeline().validate().is_ok());
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let mut p = linear_pipeline();
        p.agents.push(AgentConfig::new("planner").with_output_key("plan2"));
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate agent name 'planner'"));
    }

    #[test]
    fn test_duplicate_output_key_rejected() {
        let mut p = linear_pipeline();
        p.agents.push(AgentConfig::new("replanner").with_output_key("planner"));
        assert!(p.validate().unwrap_err().to_string().contains("output key"));
    }

    #[test]
    fn test_unknown_routing_target_rejected() {
        let mut p = linear_pipeline();
        p.agents[2] = AgentConfig::new("critic").route("verdict", "retry", "ghost");
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("unknown stage 'ghost'"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut p = linear_pipeline();
        p.agents[1] = AgentConfig::new("executor").requires(["nobody"], JoinStrategy::All);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_capability_combo_rejected_through_pipeline() {
        let mut p = linear_pipeline();
        p.agents[0].tool_access = ToolAccess::Write;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_bad_bounds_rejected() {
        let mut p = linear_pipeline();
        p.max_llm_calls = Some(0);
        assert!(p.validate().is_err());

        let mut p = linear_pipeline();
        p.default_edge_limit = -1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_end_is_reserved_agent_name() {
        let p = PipelineConfig::new(
            "terminal",
            vec![
                AgentConfig::new("intake").with_default_next("end"),
                AgentConfig::new(END_STAGE).with_stage_order(1),
            ],
        );
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_dependency_cycle_rejected() {
        let p = PipelineConfig::new(
            "cyclic",
            vec![
                AgentConfig::new("a").requires(["c"], JoinStrategy::All),
                AgentConfig::new("b").requires(["a"], JoinStrategy::All),
                AgentConfig::new("c").after(["b"]),
            ],
        );
        assert!(p.validate().unwrap_err().to_string().contains("cycle"));
    }

    #[test]
    fn test_resume_stage_must_exist() {
        let mut p = linear_pipeline();
        p.resume_stages.clarification = Some("intake".to_string());
        assert!(p.validate().is_err());

        p.resume_stages.clarification = Some("planner".to_string());
        assert!(p.validate().is_ok());
    }

    // ── 2. Queries ──────────────────────────────────────────────────────

    #[test]
    fn test_stage_order_sorted_by_stage_order() {
        let p = PipelineConfig::new(
            "p",
            vec![
                AgentConfig::new("c").with_stage_order(3),
                AgentConfig::new("a").with_stage_order(1),
                AgentConfig::new("b").with_stage_order(2),
            ],
        );
        assert_eq!(p.get_stage_order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_edge_limit_lookup_and_default() {
        let mut p = linear_pipeline().with_edge_limit("critic", "planner", 3);
        assert_eq!(p.get_edge_limit("critic", "planner"), 3);
        assert_eq!(p.get_edge_limit("planner", "executor"), 0);

        p.default_edge_limit = 7;
        assert_eq!(p.get_edge_limit("planner", "executor"), 7);
    }

    #[test]
    fn test_resume_stage_lookup() {
        let stages = ResumeStages {
            confirmation: Some("executor".to_string()),
            ..Default::default()
        };
        assert_eq!(stages.for_kind(InterruptKind::Confirmation), Some("executor"));
        assert_eq!(stages.for_kind(InterruptKind::Clarification), None);
        assert_eq!(stages.for_kind(InterruptKind::SystemError), None);
    }

    // ── 3. Readiness ────────────────────────────────────────────────────

    fn join_pipeline(join: JoinStrategy) -> PipelineConfig {
        PipelineConfig::new(
            "fan_in",
            vec![
                AgentConfig::new("A").with_stage_order(1),
                AgentConfig::new("B").with_stage_order(1),
                AgentConfig::new("C").with_stage_order(2).requires(["A", "B"], join),
            ],
        )
    }

    #[test]
    fn test_ready_join_all() {
        let p = join_pipeline(JoinStrategy::All);
        assert_eq!(p.get_ready_stages(&set(&[])), vec!["A", "B"]);
        assert_eq!(p.get_ready_stages(&set(&["A"])), vec!["B"]);
        assert_eq!(p.get_ready_stages(&set(&["A", "B"])), vec!["C"]);
    }

    #[test]
    fn test_ready_join_any() {
        let p = join_pipeline(JoinStrategy::Any);
        assert_eq!(p.get_ready_stages(&set(&["A"])), vec!["B", "C"]);
        assert_eq!(p.get_ready_stages(&set(&["B"])), vec!["A", "C"]);
    }

    #[test]
    fn test_failed_dependency_blocks_requires_but_not_after() {
        let p = PipelineConfig::new(
            "soft",
            vec![
                AgentConfig::new("fetch"),
                AgentConfig::new("summarize").requires(["fetch"], JoinStrategy::All),
                AgentConfig::new("report").after(["fetch"]),
            ],
        );
        let ready = p.ready_stages(&set(&[]), &set(&["fetch"]));
        assert_eq!(ready, vec!["report"]);
    }

    // ── 4. JSON ─────────────────────────────────────────────────────────

    #[test]
    fn test_from_json_with_defaults() {
        let raw = json!({
            "name": "qa",
            "agents": [
                {"name": "answer", "has_llm": true, "model_role": "answerer"}
            ],
            "edge_limits": [{"from": "answer", "to": "answer", "max_count": 2}],
            "resume_stages": {"clarification": "answer"}
        })
        .to_string();

        let p = PipelineConfig::from_json(&raw).unwrap();
        assert_eq!(p.max_iterations, None);
        assert_eq!(p.max_llm_calls, None);
        assert_eq!(p.max_agent_hops, None);
        assert_eq!(p.default_run_mode, RunMode::Sequential);
        assert_eq!(p.get_edge_limit("answer", "answer"), 2);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_json_schema_published() {
        let schema = PipelineConfig::json_schema();
        let props = &schema["properties"];
        assert!(props.get("agents").is_some());
        assert!(props.get("edge_limits").is_some());
        assert!(props.get("resume_stages").is_some());
    }
}
