//! Agent lifecycle events.
//!
//! Agents emit an [`AgentEvent::Started`] before and an
//! [`AgentEvent::Completed`] after every run through the injected
//! [`EventContext`]. Emission is synchronous and must not block; sinks that
//! forward events elsewhere should queue them.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::envelope::{FailureKind, ProcessingStatus};

/// Lifecycle event of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AgentEvent {
    #[serde(rename = "agent.started")]
    Started {
        agent: String,
        envelope_id: String,
        stage_order: i32,
    },

    #[serde(rename = "agent.completed")]
    Completed {
        agent: String,
        envelope_id: String,
        status: ProcessingStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<FailureKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_stage: Option<String>,
        llm_calls: i32,
        duration_ms: i64,
    },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::Started { .. } => "agent.started",
            AgentEvent::Completed { .. } => "agent.completed",
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            AgentEvent::Started { agent, .. } | AgentEvent::Completed { agent, .. } => agent,
        }
    }
}

/// Sink for agent lifecycle events.
pub trait EventContext: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventContext;

impl EventContext for NoopEventContext {
    fn emit(&self, _event: AgentEvent) {}
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventContext {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelEventContext {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventContext for ChannelEventContext {
    fn emit(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped, discarding agent event");
        }
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventContext {
    events: Mutex<Vec<AgentEvent>>,
}

impl RecordingEventContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventContext for RecordingEventContext {
    fn emit(&self, event: AgentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(agent: &str) -> AgentEvent {
        AgentEvent::Started {
            agent: agent.to_string(),
            envelope_id: "env_1".to_string(),
            stage_order: 1,
        }
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(started("planner")).unwrap();
        assert_eq!(json["event_type"], "agent.started");
        assert_eq!(json["agent"], "planner");

        let completed = AgentEvent::Completed {
            agent: "planner".to_string(),
            envelope_id: "env_1".to_string(),
            status: ProcessingStatus::Error,
            failure: Some(FailureKind::Timeout),
            next_stage: None,
            llm_calls: 1,
            duration_ms: 30_000,
        };
        let json = serde_json::to_value(&completed).unwrap();
        assert_eq!(json["event_type"], completed.event_type());
        assert_eq!(json["status"], "error");
        assert_eq!(json["failure"], "timeout");
        assert!(json.get("next_stage").is_none());
    }

    #[tokio::test]
    async fn test_channel_context_forwards() {
        let (ctx, mut rx) = ChannelEventContext::new();
        ctx.emit(started("a"));
        ctx.emit(started("b"));

        assert_eq!(rx.recv().await.unwrap().agent(), "a");
        assert_eq!(rx.recv().await.unwrap().agent(), "b");
    }

    #[test]
    fn test_channel_context_survives_dropped_receiver() {
        let (ctx, rx) = ChannelEventContext::new();
        drop(rx);
        ctx.emit(started("a"));
    }

    #[test]
    fn test_recording_context_keeps_order() {
        let ctx = RecordingEventContext::new();
        ctx.emit(started("a"));
        ctx.emit(started("b"));
        let agents: Vec<String> = ctx.events().iter().map(|e| e.agent().to_string()).collect();
        assert_eq!(agents, vec!["a", "b"]);
    }
}
