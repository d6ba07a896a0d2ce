//! Tool processing mode: execute the steps of the current plan.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::StageFailure;
use crate::envelope::{AgentOutput, Envelope, FailureKind, ToolAccess};
use crate::observability::MetricsCollector;
use crate::pipeline::AgentConfig;
use crate::tools::{AccessDecision, ToolAccessPolicy, ToolError, ToolExecutor};

/// Output key the plan is read from.
pub const PLAN_OUTPUT_KEY: &str = "plan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Error,
    Denied,
    Skipped,
}

/// One plan step as written by a planner.
#[derive(Debug, Clone, Deserialize)]
struct PlanStep {
    tool: String,
    #[serde(default)]
    parameters: Value,
    /// Access the step needs; read when absent.
    #[serde(default)]
    access: Option<ToolAccess>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub tool: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl StepResult {
    fn new(step_id: String, tool: String, status: StepStatus) -> Self {
        Self {
            step_id,
            tool,
            status,
            result: None,
            error: None,
            duration_ms: 0,
        }
    }
}

fn step_id(raw: &Value, index: usize) -> String {
    match raw.get("step_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => format!("step_{}", index + 1),
        Some(other) => other.to_string(),
    }
}

/// Run every step of `outputs["plan"]["steps"]` in order.
///
/// A missing plan yields an empty result set.
pub async fn run(
    config: &AgentConfig,
    executor: &dyn ToolExecutor,
    policy: &ToolAccessPolicy,
    metrics: &dyn MetricsCollector,
    envelope: &Envelope,
    cancel: &CancellationToken,
    tool_calls: &mut i32,
) -> Result<AgentOutput, StageFailure> {
    let steps: Vec<Value> = envelope
        .get_output(PLAN_OUTPUT_KEY)
        .and_then(|plan| plan.get("steps"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if steps.is_empty() {
        debug!("no plan steps to execute");
    }

    let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());
    let mut halted: Option<String> = None;

    for (index, raw) in steps.iter().enumerate() {
        let id = step_id(raw, index);

        if halted.is_some() {
            let tool = raw.get("tool").and_then(Value::as_str).unwrap_or_default();
            results.push(StepResult::new(id, tool.to_string(), StepStatus::Skipped));
            continue;
        }
        if cancel.is_cancelled() {
            return Err(StageFailure::new(
                FailureKind::Cancelled,
                format!("cancelled before step {}", id),
            ));
        }

        let step: PlanStep = match serde_json::from_value(raw.clone()) {
            Ok(step) => step,
            Err(e) => {
                let mut result = StepResult::new(id, String::new(), StepStatus::Error);
                result.error = Some(format!("invalid step: {}", e));
                if !config.continue_on_tool_failure {
                    halted = result.error.clone();
                }
                results.push(result);
                continue;
            }
        };

        let required = step.access.unwrap_or(ToolAccess::Read);
        if let AccessDecision::Denied(reason) = policy.check(&step.tool, required) {
            warn!(tool = %step.tool, %reason, "tool call denied");
            let mut result = StepResult::new(id, step.tool, StepStatus::Denied);
            result.error = Some(reason);
            if !config.continue_on_tool_failure {
                halted = result.error.clone();
            }
            results.push(result);
            continue;
        }

        let params = match step.parameters {
            Value::Null => json!({}),
            other => other,
        };

        let started = Instant::now();
        *tool_calls += 1;
        let outcome = executor.execute(&step.tool, params, cancel).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        metrics.tool_call(&config.name, &step.tool, outcome.is_ok(), duration_ms);

        let mut result = StepResult::new(id, step.tool, StepStatus::Success);
        result.duration_ms = duration_ms;
        match outcome {
            Ok(value) => result.result = Some(value),
            Err(err) if err.is_infrastructure() => {
                let kind = match err {
                    ToolError::Timeout => FailureKind::Timeout,
                    _ => FailureKind::Cancelled,
                };
                return Err(StageFailure::new(
                    kind,
                    format!("tool '{}': {}", result.tool, err),
                ));
            }
            Err(err) => {
                debug!(tool = %result.tool, error = %err, "tool step failed");
                result.status = StepStatus::Error;
                result.error = Some(err.to_string());
                if !config.continue_on_tool_failure {
                    halted = result.error.clone();
                }
            }
        }
        results.push(result);
    }

    if let Some(reason) = halted {
        return Err(StageFailure::new(
            FailureKind::Tool,
            format!("tool execution halted: {}", reason),
        ));
    }

    Ok(aggregate(&results))
}

fn aggregate(results: &[StepResult]) -> AgentOutput {
    let count = |status: StepStatus| results.iter().filter(|r| r.status == status).count();
    let successful = count(StepStatus::Success);
    let failed = count(StepStatus::Error);
    let denied = count(StepStatus::Denied);

    let mut out = AgentOutput::new();
    out.insert(
        "results".to_string(),
        serde_json::to_value(results).unwrap_or(Value::Null),
    );
    out.insert("total_steps".to_string(), json!(results.len()));
    out.insert("successful_steps".to_string(), json!(successful));
    out.insert("failed_steps".to_string(), json!(failed));
    out.insert("denied_steps".to_string(), json!(denied));
    out.insert(
        "all_succeeded".to_string(),
        json!(successful == results.len()),
    );
    out
}
