//! Streaming delivery of per-stage results.
//!
//! A streamed run pushes one [`StreamEvent::Stage`] per finished stage, in
//! completion order, and closes with exactly one [`StreamEvent::Finished`].

use futures::channel::mpsc;
use futures::SinkExt;
use serde::Serialize;
use tracing::debug;

use super::RunOutcome;
use crate::agent::{AgentOutcome, StageFailure};
use crate::envelope::{AgentOutput, Envelope};

/// Result of one finished stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutput {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
}

impl From<&AgentOutcome> for StageOutput {
    fn from(outcome: &AgentOutcome) -> Self {
        Self {
            stage: outcome.agent.clone(),
            output: outcome.output.clone(),
            error: outcome.failure.clone(),
        }
    }
}

/// Item of a streamed run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Stage(StageOutput),
    /// Terminal sentinel. Carries the final envelope and either the outcome
    /// or the error that ended the run.
    Finished {
        envelope: Box<Envelope>,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<RunOutcome>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, StreamEvent::Finished { .. })
    }
}

/// Stage result sink used by the schedulers. Silent when not streaming.
#[derive(Debug)]
pub(crate) struct Emitter {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl Emitter {
    pub(crate) fn none() -> Self {
        Self { tx: None }
    }

    pub(crate) fn channel(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) async fn stage(&mut self, outcome: &AgentOutcome) {
        self.send(StreamEvent::Stage(StageOutput::from(outcome)))
            .await;
    }

    pub(crate) async fn finish(mut self, event: StreamEvent) {
        self.send(event).await;
    }

    async fn send(&mut self, event: StreamEvent) {
        let dropped = match &mut self.tx {
            Some(tx) => tx.send(event).await.is_err(),
            None => false,
        };
        if dropped {
            // Consumer went away; the run itself keeps going.
            debug!("stream receiver dropped");
            self.tx = None;
        }
    }
}
