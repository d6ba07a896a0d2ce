//! LLM processing mode.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::capabilities::{GenerateOptions, LlmProvider, PromptRegistry, ProviderError};
use super::parse::{parse_lenient, unparsed_output};
use super::StageFailure;
use crate::envelope::{AgentOutput, Envelope, FailureKind};
use crate::observability::MetricsCollector;
use crate::pipeline::AgentConfig;

/// Context handed to the prompt registry.
pub fn prompt_context(config: &AgentConfig, envelope: &Envelope) -> HashMap<String, Value> {
    let mut ctx = HashMap::new();
    ctx.insert("agent".to_string(), Value::String(config.name.clone()));
    ctx.insert(
        "raw_input".to_string(),
        Value::String(envelope.raw_input.clone()),
    );
    ctx.insert(
        "iteration".to_string(),
        Value::from(envelope.pipeline.iteration),
    );
    ctx.insert(
        "loop_feedback".to_string(),
        Value::from(envelope.execution.loop_feedback.clone()),
    );
    for (key, output) in &envelope.outputs {
        ctx.insert(
            key.clone(),
            serde_json::to_value(output).unwrap_or(Value::Null),
        );
    }
    ctx
}

/// Fallback prompt when the registry has nothing for this agent.
pub fn synthesize_prompt(config: &AgentConfig, envelope: &Envelope) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are the {} agent.", config.name);
    let _ = writeln!(prompt, "User request: {}", envelope.raw_input);

    let mut keys: Vec<&String> = envelope.outputs.keys().collect();
    keys.sort();
    if !keys.is_empty() {
        let _ = writeln!(prompt, "\nPrior outputs:");
        for key in keys {
            let rendered = serde_json::to_string(&envelope.outputs[key]).unwrap_or_default();
            let _ = writeln!(prompt, "{}: {}", key, rendered);
        }
    }

    if !envelope.execution.loop_feedback.is_empty() {
        let _ = writeln!(prompt, "\nFeedback from previous attempts:");
        for feedback in &envelope.execution.loop_feedback {
            let _ = writeln!(prompt, "- {}", feedback);
        }
    }

    if !config.required_output_fields.is_empty() {
        let _ = writeln!(
            prompt,
            "\nInclude these fields: {}.",
            config.required_output_fields.join(", ")
        );
    }
    prompt.push_str("\nRespond with a single JSON object.");
    prompt
}

/// One LLM attempt: resolve prompt, call the provider, parse leniently.
///
/// `llm_calls` is incremented before the provider is called so an aborted
/// call is still counted.
pub async fn run(
    config: &AgentConfig,
    provider: &dyn LlmProvider,
    prompts: Option<&dyn PromptRegistry>,
    metrics: &dyn MetricsCollector,
    envelope: &Envelope,
    cancel: &CancellationToken,
    llm_calls: &mut i32,
) -> Result<AgentOutput, StageFailure> {
    let key = config.prompt_key.as_deref().unwrap_or(&config.name);
    let prompt = prompts
        .and_then(|registry| registry.get(key, &prompt_context(config, envelope)))
        .unwrap_or_else(|| synthesize_prompt(config, envelope));

    let role = config.model_role.as_deref().unwrap_or(&config.name);
    let options = GenerateOptions {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    debug!(role, prompt_len = prompt.len(), "calling llm provider");
    *llm_calls += 1;
    metrics.llm_call(&config.name, role);

    let text = provider
        .generate(role, &prompt, &options, cancel)
        .await
        .map_err(|e| {
            let kind = match e {
                ProviderError::Cancelled => FailureKind::Cancelled,
                ProviderError::Timeout => FailureKind::Timeout,
                _ => FailureKind::Llm,
            };
            StageFailure::new(kind, e.to_string())
        })?;

    Ok(match parse_lenient(&text) {
        Ok(output) => output,
        Err(err) => {
            warn!(error = %err, "llm response is not structured, keeping raw text");
            unparsed_output(&text, &err)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_synthesized_prompt_mentions_context() {
        let config = AgentConfig::new("planner")
            .with_llm("planner")
            .with_required_fields(["steps"]);
        let mut env = Envelope::with_input("find cheap flights");
        env.set_output(
            "intent",
            [("goal".to_string(), json!("travel"))].into_iter().collect(),
        );
        env.execution.loop_feedback.push("too expensive".to_string());

        let prompt = synthesize_prompt(&config, &env);
        assert!(prompt.contains("You are the planner agent."));
        assert!(prompt.contains("User request: find cheap flights"));
        assert!(prompt.contains("intent: {\"goal\":\"travel\"}"));
        assert!(prompt.contains("- too expensive"));
        assert!(prompt.contains("Include these fields: steps."));
    }

    #[test]
    fn test_prompt_context_exposes_outputs() {
        let config = AgentConfig::new("critic");
        let mut env = Envelope::with_input("q");
        env.set_output(
            "plan",
            [("steps".to_string(), json!([]))].into_iter().collect(),
        );

        let ctx = prompt_context(&config, &env);
        assert_eq!(ctx["raw_input"], "q");
        assert_eq!(ctx["agent"], "critic");
        assert_eq!(ctx["plan"], json!({"steps": []}));
        assert_eq!(ctx["iteration"], 0);
    }
}
