//! Sequential scheduling: follow the routing target of each stage.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::stream::Emitter;
use super::Runtime;
use crate::envelope::{Envelope, ProcessingStatus};
use crate::pipeline::END_STAGE;
use crate::types::{Error, Result};

/// Drive `envelope` stage by stage until it terminates or pauses.
///
/// Returns the number of stages dispatched.
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

        let stage = envelope.pipeline.current_stage.clone();
        if stage == END_STAGE {
            runtime.complete_run(envelope);
            break;
        }
        let agent = runtime
            .agent(&stage)
            .ok_or_else(|| Error::not_found(format!("no agent for stage '{}'", stage)))?;

        debug!(stage = %stage, iteration = envelope.pipeline.iteration, "dispatching stage");
        envelope.start_stage(&stage);
        let outcome = agent.process(envelope, cancel).await;
        stages_run += 1;
        emitter.stage(&outcome).await;

        match (&outcome.status, &outcome.failure) {
            (ProcessingStatus::Success, _) => envelope.complete_stage(&stage),
            (_, Some(failure)) => envelope.fail_stage(&stage, failure.message.clone()),
            (_, None) => envelope.fail_stage(&stage, "stage failed"),
        }
        if outcome.is_cancelled() {
            return Err(runtime.cancel_run(envelope));
        }
        if envelope.interrupts.interrupt_pending {
            info!(stage = %stage, "stage raised an interrupt, pausing");
            break;
        }

        runtime.route(envelope, &stage, &outcome.next_stage);
    }

    Ok(stages_run)
}
