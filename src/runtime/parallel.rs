//! Parallel scheduling: rounds of dependency-ready stages.
//!
//! Each ready stage runs as its own task on a private clone of the envelope.
//! The round is a barrier: results are merged into the shared envelope only
//! after every task in the round has finished. Readiness guarantees that no
//! two stages of a round share a name or output key.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream::Emitter;
use super::Runtime;
use crate::agent::AgentOutcome;
use crate::envelope::{Envelope, FailureKind, ProcessingStatus, StageError};
use crate::types::{Error, Result};

pub(super) async fn run(
    runtime: &Runtime,
    envelope: &mut Envelope,
    cancel: &CancellationToken,
    emitter: &mut Emitter,
) -> Result<usize> {
    let mut stages_run = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(runtime.cancel_run(envelope));
        }
        if !envelope.can_continue() {
            break;
        }
        envelope.pipeline.parallel_mode = true;

        let ready = ready_stages(runtime, envelope);
        if ready.is_empty() {
            let blocked = blocked_stages(runtime, envelope);
            if blocked.is_empty() {
                runtime.complete_run(envelope);
            } else {
                abandon_blocked(envelope, &blocked);
            }
            break;
        }
        let ready = within_budget(runtime, envelope, ready);
        debug!(stages = ?ready, "dispatching round");

        for stage in &ready {
            envelope.start_stage(stage);
        }
        let base = envelope.clone();

        let mut tasks = FuturesUnordered::new();
        for (index, stage) in ready.iter().enumerate() {
            let agent = runtime
                .agent_handle(stage)
                .ok_or_else(|| Error::not_found(format!("no agent for stage '{}'", stage)))?;
            let mut worker = base.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = agent.process(&mut worker, &cancel).await;
                (index, outcome, worker)
            }));
        }

        let mut finished: Vec<(usize, AgentOutcome, Envelope)> = Vec::with_capacity(ready.len());
        while let Some(joined) = tasks.next().await {
            let (index, outcome, worker) =
                joined.map_err(|e| Error::internal(format!("stage task failed: {}", e)))?;
            emitter.stage(&outcome).await;
            finished.push((index, outcome, worker));
        }

        // Merge in stage order so the audit trail is deterministic.
        finished.sort_by_key(|(index, _, _)| *index);
        let mut cancelled = false;
        for (index, outcome, worker) in finished {
            merge(envelope, &base, &ready[index], &outcome, worker);
            cancelled |= outcome.is_cancelled();
            stages_run += 1;
        }
        if cancelled {
            return Err(runtime.cancel_run(envelope));
        }
        if envelope.interrupts.interrupt_pending {
            info!("round raised an interrupt, pausing");
            break;
        }
    }

    Ok(stages_run)
}

/// Stages ready to dispatch, excluding any still marked active.
fn ready_stages(runtime: &Runtime, envelope: &Envelope) -> Vec<String> {
    let failed: HashSet<String> = envelope.pipeline.failed_stages.keys().cloned().collect();
    runtime
        .pipeline()
        .ready_stages(&envelope.pipeline.completed_stage_set, &failed)
        .into_iter()
        .filter(|stage| !envelope.is_stage_active(stage))
        .collect()
}

/// Trim a ready set to the round cap and to what the remaining hop and LLM
/// budgets allow, so a round cannot overshoot the global bounds. Each stage
/// costs one hop; LLM stages also cost at least one call.
fn within_budget(runtime: &Runtime, envelope: &Envelope, ready: Vec<String>) -> Vec<String> {
    let cap = match runtime.settings().max_parallel_stages {
        0 => usize::MAX,
        cap => cap,
    };
    let mut hops_left = envelope.bounds.max_agent_hops - envelope.bounds.agent_hop_count;
    let mut llm_left = envelope.bounds.max_llm_calls - envelope.bounds.llm_call_count;

    let mut admitted = Vec::with_capacity(ready.len().min(cap));
    for stage in ready {
        if admitted.len() >= cap || hops_left <= 0 {
            break;
        }
        let uses_llm = runtime
            .pipeline()
            .get_agent(&stage)
            .is_some_and(|agent| agent.has_llm && !agent.use_mock);
        if uses_llm {
            if llm_left <= 0 {
                continue;
            }
            llm_left -= 1;
        }
        hops_left -= 1;
        admitted.push(stage);
    }
    admitted
}

/// Stages that never ran and can no longer become ready.
fn blocked_stages(runtime: &Runtime, envelope: &Envelope) -> Vec<String> {
    runtime
        .pipeline()
        .get_stage_order()
        .into_iter()
        .filter(|stage| {
            !envelope.is_stage_completed(stage)
                && !envelope.is_stage_failed(stage)
                && !envelope.is_stage_active(stage)
        })
        .collect()
}

/// End a run whose remaining stages wait on failed dependencies.
fn abandon_blocked(envelope: &mut Envelope, blocked: &[String]) {
    warn!(stages = ?blocked, "stages blocked by failed dependencies, ending run");
    for stage in blocked {
        envelope.add_error(StageError {
            stage: stage.clone(),
            agent: stage.clone(),
            kind: FailureKind::Dependency,
            message: "required stages failed".to_string(),
            occurred_at: Utc::now(),
        });
    }
    envelope.terminate(format!("{} stage(s) blocked by failed dependencies", blocked.len()));
}

/// Fold one worker's changes into the shared envelope.
///
/// Only what the stage owns is taken: its output key, the records and errors
/// it appended, its counter deltas, its stage status and the first interrupt
/// raised in the round.
fn merge(
    envelope: &mut Envelope,
    base: &Envelope,
    stage: &str,
    outcome: &AgentOutcome,
    mut worker: Envelope,
) {
    if let Some(output) = worker.outputs.remove(&outcome.output_key) {
        envelope.set_output(outcome.output_key.clone(), output);
    }

    envelope.audit.processing_history.extend(
        worker
            .audit
            .processing_history
            .into_iter()
            .skip(base.audit.processing_history.len()),
    );
    envelope
        .audit
        .errors
        .extend(worker.audit.errors.into_iter().skip(base.audit.errors.len()));

    envelope.bounds.llm_call_count += worker.bounds.llm_call_count - base.bounds.llm_call_count;
    envelope.bounds.tool_call_count += worker.bounds.tool_call_count - base.bounds.tool_call_count;
    envelope.bounds.agent_hop_count += worker.bounds.agent_hop_count - base.bounds.agent_hop_count;
    envelope.bounds.tokens_in += worker.bounds.tokens_in - base.bounds.tokens_in;
    envelope.bounds.tokens_out += worker.bounds.tokens_out - base.bounds.tokens_out;

    if worker.interrupts.interrupt_pending && !envelope.interrupts.interrupt_pending {
        if let Some(interrupt) = worker.interrupts.interrupt.take() {
            envelope.set_interrupt(interrupt);
        }
    }

    match (&outcome.status, &outcome.failure) {
        (ProcessingStatus::Success, _) => envelope.complete_stage(stage),
        (_, Some(failure)) => envelope.fail_stage(stage, failure.message.clone()),
        (_, None) => envelope.fail_stage(stage, "stage failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{FlowInterrupt, InterruptKind};
    use serde_json::json;

    #[test]
    fn test_merge_takes_only_owned_changes() {
        let mut shared = Envelope::new();
        shared.start_stage("a");
        shared.start_stage("b");
        let base = shared.clone();

        let mut worker = base.clone();
        worker.record_agent_start("a", 0);
        worker.set_output("a", [("v".to_string(), json!(1))].into_iter().collect());
        worker.set_output("stray", Default::default());
        worker.record_agent_complete("a", ProcessingStatus::Success, None, 2, 5);
        worker.increment_tool_calls(3);
        worker.set_interrupt(FlowInterrupt::new(InterruptKind::Checkpoint).with_id("first"));

        let outcome = AgentOutcome {
            agent: "a".to_string(),
            output_key: "a".to_string(),
            next_stage: "end".to_string(),
            output: None,
            status: ProcessingStatus::Success,
            failure: None,
            llm_calls: 2,
            tool_calls: 3,
            duration_ms: 5,
        };
        merge(&mut shared, &base, "a", &outcome, worker);

        assert!(shared.has_output("a"));
        assert!(!shared.has_output("stray"));
        assert_eq!(shared.bounds.llm_call_count, 2);
        assert_eq!(shared.bounds.tool_call_count, 3);
        assert_eq!(shared.bounds.agent_hop_count, 1);
        assert_eq!(shared.audit.processing_history.len(), 1);
        assert!(shared.is_stage_completed("a"));
        assert!(shared.is_stage_active("b"));
        assert_eq!(shared.interrupts.interrupt.as_ref().unwrap().id, "first");
    }
}
