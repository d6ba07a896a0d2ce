//! Routing evaluation: output → next stage.

use serde_json::Value;

use crate::envelope::{AgentOutput, FailureKind};
use crate::pipeline::{AgentConfig, END_STAGE};

/// Next stage for a successful output.
///
/// The first rule whose `condition` field equals its `value` wins; otherwise
/// `default_next`; otherwise the terminal stage.
pub fn next_stage(config: &AgentConfig, output: &AgentOutput) -> String {
    config
        .routing_rules
        .iter()
        .find(|rule| output.get(&rule.condition) == Some(&rule.value))
        .map(|rule| rule.target.clone())
        .or_else(|| config.default_next.clone())
        .unwrap_or_else(|| END_STAGE.to_string())
}

/// Next stage after a failed run: `error_next` if configured, else normal
/// routing over `error_output`.
pub fn next_stage_on_failure(config: &AgentConfig, error_output: &AgentOutput) -> String {
    match &config.error_next {
        Some(target) => target.clone(),
        None => next_stage(config, error_output),
    }
}

/// Output recorded for a failed run so downstream routing can see the error.
pub fn error_output(kind: FailureKind, message: &str) -> AgentOutput {
    let mut out = AgentOutput::new();
    out.insert("error".to_string(), Value::Bool(true));
    out.insert(
        "error_kind".to_string(),
        serde_json::to_value(kind).unwrap_or(Value::Null),
    );
    out.insert("error_message".to_string(), Value::String(message.to_string()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn out(pairs: &[(&str, Value)]) -> AgentOutput {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_first_match_wins() {
        let config = AgentConfig::new("critic")
            .route("v", "x", "A")
            .route("v", "x", "B");
        assert_eq!(next_stage(&config, &out(&[("v", json!("x"))])), "A");
    }

    #[test]
    fn test_json_equality_is_typed() {
        let config = AgentConfig::new("critic")
            .route("score", 1, "retry")
            .with_default_next("report");
        assert_eq!(next_stage(&config, &out(&[("score", json!("1"))])), "report");
        assert_eq!(next_stage(&config, &out(&[("score", json!(1))])), "retry");
    }

    #[test]
    fn test_fallbacks() {
        let config = AgentConfig::new("critic").route("verdict", "loop_back", "planner");
        assert_eq!(next_stage(&config, &out(&[])), END_STAGE);

        let config = config.with_default_next("reporter");
        assert_eq!(
            next_stage(&config, &out(&[("verdict", json!("approve"))])),
            "reporter"
        );
    }

    #[test]
    fn test_failure_routing() {
        let failure = error_output(FailureKind::Tool, "search backend down");
        assert_eq!(failure["error"], true);
        assert_eq!(failure["error_kind"], "tool");

        let config = AgentConfig::new("executor")
            .route("error", true, "recovery")
            .with_default_next("critic");
        assert_eq!(next_stage_on_failure(&config, &failure), "recovery");

        let config = config.with_error_next("fallback");
        assert_eq!(next_stage_on_failure(&config, &failure), "fallback");
    }
}
