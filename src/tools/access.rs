//! Tool access control - agent-scoped tool permissions.
//!
//! An agent may run a tool only when its access level is not `none`, the
//! tool passes its explicit allow-list (an empty list allows every tool), and
//! its level covers the access the step requires.

use std::collections::HashSet;

use crate::envelope::ToolAccess;
use crate::pipeline::AgentConfig;

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }
}

/// Access policy of one agent.
#[derive(Debug, Clone)]
pub struct ToolAccessPolicy {
    agent_name: String,
    level: ToolAccess,
    /// Empty means "any tool".
    allowed: HashSet<String>,
}

impl ToolAccessPolicy {
    pub fn new(agent_name: impl Into<String>, level: ToolAccess) -> Self {
        Self {
            agent_name: agent_name.into(),
            level,
            allowed: HashSet::new(),
        }
    }

    /// Policy derived from an agent's configuration.
    pub fn for_agent(config: &AgentConfig) -> Self {
        let mut policy = Self::new(&config.name, config.tool_access);
        policy.grant_many(&config.allowed_tools);
        policy
    }

    /// Restrict the agent to an explicit tool (adds to the allow-list).
    pub fn grant(&mut self, tool_id: &str) {
        self.allowed.insert(tool_id.to_string());
    }

    pub fn grant_many(&mut self, tool_ids: &[String]) {
        self.allowed.extend(tool_ids.iter().cloned());
    }

    pub fn revoke(&mut self, tool_id: &str) {
        self.allowed.remove(tool_id);
    }

    pub fn level(&self) -> ToolAccess {
        self.level
    }

    /// Check whether the agent may run `tool_id` needing `required` access.
    pub fn check(&self, tool_id: &str, required: ToolAccess) -> AccessDecision {
        if self.level == ToolAccess::None {
            return AccessDecision::Denied(format!(
                "agent '{}' has no tool access",
                self.agent_name
            ));
        }
        if !self.allowed.is_empty() && !self.allowed.contains(tool_id) {
            return AccessDecision::Denied(format!(
                "tool '{}' is not in the allow-list of agent '{}'",
                tool_id, self.agent_name
            ));
        }
        if !self.level.permits(required) {
            return AccessDecision::Denied(format!(
                "tool '{}' requires {:?} access, agent '{}' has {:?}",
                tool_id, required, self.agent_name, self.level
            ));
        }
        AccessDecision::Allowed
    }

    /// Allow-listed tools, sorted. Empty when the agent is unrestricted.
    pub fn allowed_tools(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.allowed.iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_access_denies_everything() {
        let policy = ToolAccessPolicy::new("reporter", ToolAccess::None);
        assert!(!policy.check("search_web", ToolAccess::None).is_allowed());
        assert!(!policy.check("search_web", ToolAccess::Read).is_allowed());
    }

    #[test]
    fn test_level_must_cover_required() {
        let policy = ToolAccessPolicy::new("reporter", ToolAccess::Read);
        assert!(policy.check("search_web", ToolAccess::Read).is_allowed());

        let decision = policy.check("delete_data", ToolAccess::Write);
        assert!(matches!(decision, AccessDecision::Denied(msg) if msg.contains("requires Write")));
    }

    #[test]
    fn test_allow_list() {
        let mut policy = ToolAccessPolicy::new("reporter", ToolAccess::All);
        policy.grant("search_web");
        policy.grant("interview_npc");

        assert!(policy.check("search_web", ToolAccess::Write).is_allowed());
        assert!(!policy.check("delete_data", ToolAccess::Read).is_allowed());

        policy.revoke("search_web");
        assert!(!policy.check("search_web", ToolAccess::Read).is_allowed());
    }

    #[test]
    fn test_from_agent_config() {
        let mut config = AgentConfig::new("executor").with_tools(ToolAccess::Write);
        config.allowed_tools = vec!["b_tool".to_string(), "a_tool".to_string()];

        let policy = ToolAccessPolicy::for_agent(&config);
        assert_eq!(policy.level(), ToolAccess::Write);
        assert_eq!(policy.allowed_tools(), vec!["a_tool", "b_tool"]);
        assert!(policy.check("a_tool", ToolAccess::Write).is_allowed());
        assert!(!policy.check("c_tool", ToolAccess::Read).is_allowed());
    }
}
