//! Pipeline integration tests - config → runtime → agents → envelope.

use async_trait::async_trait;
use futures::StreamExt;
use jeeves_runtime::agent::{GenerateOptions, LlmProvider, ProviderError};
use jeeves_runtime::envelope::{FailureKind, ProcessingStatus, ToolAccess};
use jeeves_runtime::tools::{ToolError, ToolExecutor};
use jeeves_runtime::{
    AgentCapabilities, AgentConfig, AgentHooks, Envelope, Error, FlowInterrupt, InterruptKind,
    InterruptResponse, JoinStrategy, PipelineConfig, RunMode, RunStatus, Runtime, StreamEvent,
    TerminalReason, END_STAGE,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// LLM that answers from a per-role script.
#[derive(Default)]
struct ScriptedLlm {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    fn with(self, role: &str, responses: &[Value]) -> Self {
        self.scripts.lock().unwrap().insert(
            role.to_string(),
            responses.iter().map(|v| v.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(
        &self,
        role: &str,
        _prompt: &str,
        _options: &GenerateOptions,
        _cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(role)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| ProviderError::Request(format!("no script for {role}")))
    }
}

/// Tool executor that echoes its parameters.
struct EchoTools;

#[async_trait]
impl ToolExecutor for EchoTools {
    async fn execute(
        &self,
        tool_name: &str,
        params: Value,
        _cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        match tool_name {
            "search" => Ok(json!({"tool": tool_name, "echo": params})),
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

fn plan_execute_critic() -> PipelineConfig {
    PipelineConfig::new(
        "plan-execute-critic",
        vec![
            AgentConfig::new("planner")
                .with_stage_order(0)
                .with_output_key("plan")
                .with_llm("planner")
                .with_required_fields(["steps"])
                .with_default_next("executor"),
            AgentConfig::new("executor")
                .with_stage_order(1)
                .with_output_key("execution")
                .with_tools(ToolAccess::Read)
                .with_default_next("critic"),
            AgentConfig::new("critic")
                .with_stage_order(2)
                .with_llm("critic")
                .route("verdict", "loop_back", "planner")
                .with_default_next(END_STAGE),
        ],
    )
}

// ── 1. Full sequential run with a loop-back ────────────────────────────

#[tokio::test]
async fn test_plan_execute_critic_loop() {
    let llm = ScriptedLlm::default()
        .with(
            "planner",
            &[
                json!({"steps": [{"tool": "search", "parameters": {"q": "flights"}}]}),
                json!({"steps": [{"tool": "search", "parameters": {"q": "trains"}}]}),
            ],
        )
        .with(
            "critic",
            &[json!({"verdict": "loop_back"}), json!({"verdict": "approve"})],
        );
    let runtime = Runtime::builder(plan_execute_critic())
        .with_capabilities(
            AgentCapabilities::new()
                .with_llm(Arc::new(llm))
                .with_tools(Arc::new(EchoTools)),
        )
        .build()
        .unwrap();
    let mut env = Envelope::with_input("get me to Lisbon");

    let outcome = runtime
        .execute(&mut env, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stages_run, 6);
    assert_eq!(env.bounds.llm_call_count, 4);
    assert_eq!(env.bounds.tool_call_count, 2);
    assert_eq!(env.bounds.agent_hop_count, 6);
    assert_eq!(env.pipeline.iteration, 1);
    assert_eq!(env.pipeline.edge_traversals["critic->planner"], 1);

    let execution = env.get_output("execution").unwrap();
    assert_eq!(execution["results"][0]["result"]["echo"]["q"], "trains");
    assert_eq!(env.get_output("critic").unwrap()["verdict"], "approve");
    assert!(env
        .audit
        .processing_history
        .iter()
        .all(|r| r.status == ProcessingStatus::Success));
}

// ── 2. Edge limits from a JSON definition ───────────────────────────────

#[tokio::test]
async fn test_edge_limit_from_json_forces_end_on_fourth_loop() {
    let pipeline = PipelineConfig::from_json(
        r#"{
            "name": "looping",
            "max_iterations": 50,
            "edge_limits": [{"from": "critic", "to": "planner", "max_count": 3}],
            "agents": [
                {"name": "planner", "stage_order": 0, "default_next": "critic"},
                {"name": "critic", "stage_order": 1, "use_mock": true,
                 "routing_rules": [{"condition": "verdict", "value": "loop_back", "target": "planner"}]}
            ]
        }"#,
    )
    .unwrap();
    let runtime = Runtime::builder(pipeline)
        .with_hooks(
            "critic",
            AgentHooks::new().with_mock(|_| {
                Ok([("verdict".to_string(), json!("loop_back"))]
                    .into_iter()
                    .collect())
            }),
        )
        .build()
        .unwrap();
    let mut env = Envelope::new();

    let outcome = runtime
        .execute(&mut env, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Terminated);
    assert_eq!(
        outcome.terminal_reason,
        Some(TerminalReason::MaxStageVisitsExceeded)
    );
    assert_eq!(env.pipeline.edge_traversals["critic->planner"], 4);
    assert_eq!(env.pipeline.current_stage, END_STAGE);
    let critic_runs = env
        .audit
        .processing_history
        .iter()
        .filter(|r| r.agent == "critic")
        .count();
    assert_eq!(critic_runs, 4);
}

// ── 3. Bounds ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_llm_call_bound_stops_run() {
    let llm = ScriptedLlm::default()
        .with("planner", &[json!({"steps": []}), json!({"steps": []})])
        .with(
            "critic",
            &[json!({"verdict": "loop_back"}), json!({"verdict": "loop_back"})],
        );
    let mut pipeline = plan_execute_critic();
    pipeline.max_llm_calls = Some(3);
    let runtime = Runtime::builder(pipeline)
        .with_capabilities(
            AgentCapabilities::new()
                .with_llm(Arc::new(llm))
                .with_tools(Arc::new(EchoTools)),
        )
        .build()
        .unwrap();
    let mut env = Envelope::new();

    let outcome = runtime
        .execute(&mut env, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.terminal_reason,
        Some(TerminalReason::MaxLlmCallsExceeded)
    );
    assert_eq!(env.bounds.llm_call_count, 3);
    assert!(env.bounds.terminated);
    assert!(!env.check_bounds().can_continue);
}

#[tokio::test]
async fn test_parallel_round_stays_within_llm_bound() {
    let llm = ScriptedLlm::default()
        .with("a", &[json!({"answer": 1})])
        .with("b", &[json!({"answer": 2})])
        .with("c", &[json!({"answer": 3})]);
    let pipeline = PipelineConfig::new(
        "fan-llm",
        vec![
            AgentConfig::new("a").with_llm("a"),
            AgentConfig::new("b").with_stage_order(1).with_llm("b"),
            AgentConfig::new("c").with_stage_order(2).with_llm("c"),
        ],
    )
    .with_run_mode(RunMode::Parallel)
    .with_max_llm_calls(2);
    let runtime = Runtime::builder(pipeline)
        .with_capabilities(AgentCapabilities::new().with_llm(Arc::new(llm)))
        .build()
        .unwrap();
    let mut env = Envelope::new();

    let outcome = runtime
        .execute(&mut env, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.terminal_reason,
        Some(TerminalReason::MaxLlmCallsExceeded)
    );
    assert_eq!(env.bounds.llm_call_count, 2);
    assert!(env.is_stage_completed("a"));
    assert!(env.is_stage_completed("b"));
    assert!(!env.has_output("c"));
}

// ── 4. Readiness ────────────────────────────────────────────────────────

#[test]
fn test_all_and_any_readiness() {
    let pipeline = PipelineConfig::new(
        "dag",
        vec![
            AgentConfig::new("a"),
            AgentConfig::new("b"),
            AgentConfig::new("all").requires(["a", "b"], JoinStrategy::All),
            AgentConfig::new("any").requires(["a", "b"], JoinStrategy::Any),
        ],
    );
    let completed: HashSet<String> = ["a".to_string()].into_iter().collect();

    let ready = pipeline.get_ready_stages(&completed);
    assert!(ready.contains(&"any".to_string()));
    assert!(!ready.contains(&"all".to_string()));
    assert!(ready.contains(&"b".to_string()));
    assert!(!ready.contains(&"a".to_string()));
}

// ── 5. Parallel mode with interrupt and resume ──────────────────────────

#[tokio::test]
async fn test_parallel_interrupt_then_resume() {
    let mut pipeline = PipelineConfig::new(
        "review",
        vec![
            AgentConfig::new("draft"),
            AgentConfig::new("review")
                .with_stage_order(1)
                .requires(["draft"], JoinStrategy::All),
            AgentConfig::new("publish")
                .with_stage_order(2)
                .requires(["review"], JoinStrategy::All),
        ],
    )
    .with_run_mode(RunMode::Parallel);
    pipeline.resume_stages.agent_review = Some("review".to_string());

    let reviewed = Arc::new(Mutex::new(false));
    let flag = reviewed.clone();
    let runtime = Runtime::builder(pipeline)
        .with_hooks(
            "review",
            AgentHooks::new().with_post_process(move |env, _, _| {
                let approved = env
                    .interrupts
                    .interrupt
                    .as_ref()
                    .and_then(|i| i.response.as_ref())
                    .and_then(|r| r.approved)
                    .unwrap_or(false);
                if !approved {
                    env.set_interrupt(
                        FlowInterrupt::new(InterruptKind::AgentReview).with_message("check draft"),
                    );
                } else {
                    *flag.lock().unwrap() = true;
                }
                Ok(())
            }),
        )
        .build()
        .unwrap();
    let mut env = Envelope::new();
    let cancel = CancellationToken::new();

    let paused = runtime.execute(&mut env, &cancel).await.unwrap();
    assert_eq!(paused.status, RunStatus::Interrupted);
    assert!(env.is_stage_completed("review"));
    assert!(!env.is_stage_completed("publish"));

    let snapshot = env.clone();
    let resumed = runtime
        .resume(&mut env, InterruptResponse::approval(true), &cancel)
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert!(*reviewed.lock().unwrap());
    assert!(env.is_stage_completed("publish"));
    assert_eq!(env.bounds.terminal_reason, Some(TerminalReason::Completed));
    assert_eq!(
        env.audit.processing_history.len(),
        snapshot.audit.processing_history.len() + 2
    );
}

// ── 6. Streaming ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_parallel_stream_emits_every_stage_then_sentinel() {
    let pipeline = PipelineConfig::new(
        "fan",
        vec![
            AgentConfig::new("root"),
            AgentConfig::new("left")
                .with_stage_order(1)
                .requires(["root"], JoinStrategy::All),
            AgentConfig::new("right")
                .with_stage_order(1)
                .requires(["root"], JoinStrategy::All),
        ],
    );
    let runtime = Runtime::builder(pipeline).build().unwrap();

    let events: Vec<StreamEvent> = runtime
        .execute_stream_with_mode(Envelope::new(), RunMode::Parallel, CancellationToken::new())
        .collect()
        .await;

    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], StreamEvent::Stage(s) if s.stage == "root"));
    let later: HashSet<&str> = events[1..3]
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Stage(s) => Some(s.stage.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(later, HashSet::from(["left", "right"]));
    assert!(events[3].is_finished());
}

#[tokio::test]
async fn test_stream_reports_error_in_sentinel() {
    let runtime = Runtime::builder(plan_execute_critic())
        .with_capabilities(
            AgentCapabilities::new()
                .with_llm(Arc::new(ScriptedLlm::default()))
                .with_tools(Arc::new(EchoTools)),
        )
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let events: Vec<StreamEvent> = runtime
        .execute_stream(Envelope::new(), cancel)
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Finished {
            envelope,
            outcome,
            error,
        } => {
            assert!(outcome.is_none());
            assert!(error.as_deref().unwrap().contains("cancelled"));
            assert_eq!(
                envelope.bounds.terminal_reason,
                Some(TerminalReason::UserCancelled)
            );
        }
        other => panic!("unexpected event {other:?}"),
    }
}

// ── 7. Cancellation mid-stage ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cancel_during_stage_records_failure() {
    let llm = ScriptedLlm {
        delay: Some(Duration::from_secs(30)),
        ..ScriptedLlm::default()
    }
    .with("planner", &[json!({"steps": []})]);
    let runtime = Runtime::builder(plan_execute_critic())
        .with_capabilities(
            AgentCapabilities::new()
                .with_llm(Arc::new(llm))
                .with_tools(Arc::new(EchoTools)),
        )
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let mut env = Envelope::new();

    let err = runtime.execute(&mut env, &cancel).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)));
    assert!(env.is_stage_failed("planner"));
    assert_eq!(env.audit.errors[0].kind, FailureKind::Cancelled);
    assert_eq!(
        env.audit.processing_history[0].status,
        ProcessingStatus::Error
    );
    assert_eq!(
        env.bounds.terminal_reason,
        Some(TerminalReason::UserCancelled)
    );
    assert!(!env.has_output("plan"));
}

// ── 8. State dict round trip ────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_state_dict_round_trip(
        raw_input in ".{0,40}",
        llm_calls in 0i32..50,
        hops in 0i32..50,
        outputs in proptest::collection::hash_map("[a-z]{1,8}", any::<i64>(), 0..5),
        feedback in proptest::collection::vec("[a-z ]{0,12}", 0..3),
    ) {
        let mut env = Envelope::with_input(raw_input);
        env.bounds.llm_call_count = llm_calls;
        env.bounds.agent_hop_count = hops;
        for (key, value) in &outputs {
            env.set_output(key.clone(), [("value".to_string(), json!(value))].into_iter().collect());
        }
        env.execution.loop_feedback = feedback;
        env.start_stage("planner");

        let restored = Envelope::from_state_dict(env.to_state_dict().unwrap()).unwrap();
        prop_assert_eq!(restored, env);
    }
}
