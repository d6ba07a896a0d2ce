//! Envelope import from a state dict (cross-runtime compatibility layer).
//!
//! State dicts written by other runtimes may carry legacy artifacts: `null`
//! in place of empty collections, and integers encoded as floats (`3.0`).
//! Both are normalized before typed deserialization.

use serde_json::{Number, Value};

use super::export::StateDict;
use super::Envelope;
use crate::types::{Error, Result};

/// Top-level keys whose `null` means "empty collection".
const MAP_FIELDS: &[&str] = &[
    "outputs",
    "failed_stages",
    "edge_traversals",
    "goal_completion_status",
    "metadata",
];

const LIST_FIELDS: &[&str] = &[
    "stage_order",
    "active_stages",
    "completed_stage_set",
    "completed_stages",
    "all_goals",
    "remaining_goals",
    "prior_plans",
    "loop_feedback",
    "processing_history",
    "errors",
];

const INT_FIELDS: &[&str] = &[
    "iteration",
    "max_iterations",
    "llm_call_count",
    "max_llm_calls",
    "tool_call_count",
    "agent_hop_count",
    "max_agent_hops",
    "tokens_in",
    "tokens_out",
    "current_stage_number",
    "max_stages",
];

const RECORD_INT_FIELDS: &[&str] = &["stage_order", "duration_ms", "llm_calls"];

/// Import envelope from a state dict.
pub fn from_state_dict(mut state: StateDict) -> Result<Envelope> {
    normalize(&mut state)?;
    Ok(serde_json::from_value(Value::Object(state))?)
}

/// Import envelope from JSON bytes.
pub fn from_json(bytes: &[u8]) -> Result<Envelope> {
    match serde_json::from_slice(bytes)? {
        Value::Object(state) => from_state_dict(state),
        _ => Err(Error::validation("state dict must be a JSON object")),
    }
}

fn normalize(state: &mut StateDict) -> Result<()> {
    for key in MAP_FIELDS {
        if let Some(value) = state.get_mut(*key) {
            if value.is_null() {
                *value = Value::Object(Default::default());
            }
        }
    }
    for key in LIST_FIELDS {
        if let Some(value) = state.get_mut(*key) {
            if value.is_null() {
                *value = Value::Array(Vec::new());
            }
        }
    }
    for key in INT_FIELDS {
        if let Some(value) = state.get_mut(*key) {
            integralize(key, value)?;
        }
    }
    if let Some(Value::Object(traversals)) = state.get_mut("edge_traversals") {
        for (edge, count) in traversals.iter_mut() {
            integralize(edge, count)?;
        }
    }
    if let Some(Value::Array(history)) = state.get_mut("processing_history") {
        for record in history.iter_mut().filter_map(Value::as_object_mut) {
            for key in RECORD_INT_FIELDS {
                if let Some(value) = record.get_mut(*key) {
                    integralize(key, value)?;
                }
            }
        }
    }
    Ok(())
}

/// Rewrite an integral float (`3.0`) as an integer; reject fractional ones.
fn integralize(field: &str, value: &mut Value) -> Result<()> {
    let Some(f) = value.as_f64().filter(|_| value.is_f64()) else {
        return Ok(());
    };
    if f.fract() != 0.0 || !f.is_finite() {
        return Err(Error::validation(format!(
            "{} must be an integer, got {}",
            field, f
        )));
    }
    *value = Value::Number(Number::from(f as i64));
    Ok(())
}
