//! End-to-end engine tests
//!
//! These run complete scenarios through the engine against scripted
//! handler capabilities, verifying phase ordering, data threading,
//! retries, composites, cancellation, and verdict aggregation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use scenario::engine::RunStatus;
use scenario::{
    scenario_from_value, ActionHandler, ContextSnapshot, Engine, HandlerError, Scenario, WaitProbe,
};

/// Handler returning a fixed value on every call, counting invocations
struct StaticHandler {
    output: Value,
    calls: Arc<AtomicU32>,
}

impl StaticHandler {
    fn new(output: Value) -> (Arc<Self>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Arc::new(Self {
                output,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

#[async_trait]
impl ActionHandler for StaticHandler {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &ContextSnapshot,
    ) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Handler replaying a script of responses, recording received params
struct ScriptedHandler {
    script: Mutex<VecDeque<Result<Value, HandlerError>>>,
    received: Mutex<Vec<Value>>,
}

impl ScriptedHandler {
    fn new(script: Vec<Result<Value, HandlerError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl ActionHandler for ScriptedHandler {
    async fn execute(&self, params: &Value, _ctx: &ContextSnapshot) -> Result<Value, HandlerError> {
        self.received.lock().push(params.clone());
        match self.script.lock().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(e)) => Err(HandlerError {
                message: e.message,
                status_code: e.status_code,
            }),
            None => Err(HandlerError::new("script exhausted")),
        }
    }
}

/// Handler that fails N times, then succeeds
struct FlakyHandler {
    failures_left: AtomicU32,
    status_code: Option<u16>,
    output: Value,
    calls: Arc<AtomicU32>,
}

impl FlakyHandler {
    fn new(failures: u32, status_code: Option<u16>, output: Value) -> (Arc<Self>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Arc::new(Self {
                failures_left: AtomicU32::new(failures),
                status_code,
                output,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

#[async_trait]
impl ActionHandler for FlakyHandler {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &ContextSnapshot,
    ) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(match self.status_code {
                Some(code) => HandlerError::with_status("transient failure", code),
                None => HandlerError::new("transient failure"),
            });
        }
        Ok(self.output.clone())
    }
}

/// Probe that reports true after N checks
struct CountProbe {
    true_after: u32,
    checks: AtomicU32,
}

impl CountProbe {
    fn new(true_after: u32) -> Arc<Self> {
        Arc::new(Self {
            true_after,
            checks: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl WaitProbe for CountProbe {
    async fn check(&self, _params: &Value, _ctx: &ContextSnapshot) -> Result<bool, HandlerError> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(n > self.true_after)
    }
}

/// Probe that never reports true
struct NeverProbe;

#[async_trait]
impl WaitProbe for NeverProbe {
    async fn check(&self, _params: &Value, _ctx: &ContextSnapshot) -> Result<bool, HandlerError> {
        Ok(false)
    }
}

fn engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_env(HashMap::new());
    engine
}

fn scenario(value: Value) -> Scenario {
    scenario_from_value(value).expect("scenario should be valid")
}

fn noop() -> (Arc<StaticHandler>, Arc<AtomicU32>) {
    StaticHandler::new(json!({"ok": true}))
}

// --- Data threading ---

#[tokio::test]
async fn test_order_flow_round_trips_context() {
    let mut engine = engine();

    let create = ScriptedHandler::new(vec![Ok(
        json!({"body": {"orderId": "o1", "status": "created"}}),
    )]);
    let get_item = ScriptedHandler::new(vec![Ok(json!({"item": {"status": "processing"}}))]);
    engine.register_handler("http_call", create.clone());
    engine.register_handler("kv_interact", get_item.clone());

    let scenario = scenario(json!({
        "name": "order_flow",
        "actions": [
            {
                "name": "CreateOrder",
                "type": "http_call",
                "params": {"url": "https://api.example.com/orders", "method": "POST"},
                "passToContext": {"orderId": "$.body.orderId"}
            },
            {
                "name": "get_item",
                "type": "kv_interact",
                "params": {"table": "orders", "operation": "get_item", "key": "{{context.orderId}}"},
                "assert": {"type": "equals", "path": "$.item.status", "expected": "processing"}
            }
        ]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Passed, "{}", verdict.reason());
    assert_eq!(verdict.actions.len(), 2);

    // The value read back from context is exactly the extracted value
    let received = get_item.received();
    assert_eq!(received[0]["key"], json!("o1"));
}

#[tokio::test]
async fn test_builtin_and_env_resolution() {
    let mut engine = engine();
    let mut env = HashMap::new();
    env.insert("API_BASE".to_string(), "https://api.example.com".to_string());
    engine.set_env(env);

    let handler = ScriptedHandler::new(vec![Ok(json!({"ok": true}))]);
    engine.register_handler("http_call", handler.clone());

    let scenario = scenario(json!({
        "name": "resolution",
        "actions": [{
            "name": "call",
            "type": "http_call",
            "params": {
                "url": "{{env.API_BASE}}/runs/{{testRunId}}",
                "body": {"marker": "{{random}}"}
            }
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed(), "{}", verdict.reason());

    let received = handler.received();
    let url = received[0]["url"].as_str().unwrap();
    assert!(url.starts_with("https://api.example.com/runs/"));
    assert!(url.len() > "https://api.example.com/runs/".len());
    assert!(received[0]["body"]["marker"].is_string());
}

#[tokio::test]
async fn test_unresolved_variable_never_dispatches() {
    let mut engine = engine();
    let handler = ScriptedHandler::new(vec![Ok(json!({"ok": true}))]);
    engine.register_handler("http_call", handler.clone());

    let scenario = scenario(json!({
        "name": "unresolved",
        "actions": [{
            "name": "call",
            "type": "http_call",
            "params": {"url": "{{context.not_set}}"}
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    assert_eq!(verdict.cause.as_ref().unwrap().kind, "UNRESOLVED_VARIABLE");
    // The handler was never invoked
    assert!(handler.received().is_empty());
}

// --- Phase ordering and cleanup guarantees ---

#[tokio::test]
async fn test_cleanup_runs_after_success() {
    let mut engine = engine();
    let (handler, _) = noop();
    let (cleanup, cleanup_calls) = noop();
    engine.register_handler("noop", handler);
    engine.register_handler("teardown", cleanup);

    let scenario = scenario(json!({
        "name": "happy",
        "actions": [{"name": "a", "type": "noop"}],
        "cleanup": [{"name": "clean", "type": "teardown"}]
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed());
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_action_failure_skips_rest_but_cleanup_runs() {
    let mut engine = engine();
    let failing = ScriptedHandler::new(vec![Err(HandlerError::new("boom"))]);
    let (never_run, never_calls) = noop();
    let (cleanup, cleanup_calls) = noop();
    engine.register_handler("failing", failing);
    engine.register_handler("noop", never_run);
    engine.register_handler("teardown", cleanup);

    let scenario = scenario(json!({
        "name": "failing_flow",
        "actions": [
            {"name": "explode", "type": "failing"},
            {"name": "after", "type": "noop"}
        ],
        "cleanup": [{"name": "clean", "type": "teardown"}]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    let cause = verdict.cause.as_ref().unwrap();
    assert_eq!(cause.kind, "HANDLER_FAILURE");
    assert!(cause.message.contains("explode"));

    assert_eq!(never_calls.load(Ordering::SeqCst), 0, "later actions skipped");
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1, "cleanup still runs");
}

#[tokio::test]
async fn test_setup_failure_goes_straight_to_cleanup() {
    let mut engine = engine();
    let failing = ScriptedHandler::new(vec![Err(HandlerError::new("no seed"))]);
    let (primary, primary_calls) = noop();
    let (cleanup, cleanup_calls) = noop();
    engine.register_handler("seed", failing);
    engine.register_handler("noop", primary);
    engine.register_handler("teardown", cleanup);

    let scenario = scenario(json!({
        "name": "setup_fails",
        "setup": [{"name": "seed_data", "type": "seed"}],
        "actions": [{"name": "a", "type": "noop"}],
        "assertions": {
            "never_checked": {"type": "exists", "path": "$.actions[0]"}
        },
        "cleanup": [{"name": "clean", "type": "teardown"}]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1);
    // Global assertions are skipped when a phase failed
    assert!(verdict.assertions.is_empty());
}

#[tokio::test]
async fn test_cleanup_failure_never_changes_verdict() {
    let mut engine = engine();
    let (handler, _) = noop();
    let failing_cleanup = ScriptedHandler::new(vec![Err(HandlerError::new("cleanup boom"))]);
    engine.register_handler("noop", handler);
    engine.register_handler("teardown", failing_cleanup);

    let scenario = scenario(json!({
        "name": "messy_cleanup",
        "actions": [{"name": "a", "type": "noop"}],
        "cleanup": [{"name": "clean", "type": "teardown"}]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Passed, "{}", verdict.reason());
    // The cleanup failure is still recorded for diagnostics
    let clean = verdict.actions.iter().find(|r| r.name == "clean").unwrap();
    assert!(!clean.succeeded());
}

// --- Assertions ---

#[tokio::test]
async fn test_assertion_failure_downgrades_action() {
    let mut engine = engine();
    let handler = ScriptedHandler::new(vec![Ok(json!({"total": "5"}))]);
    engine.register_handler("http_call", handler);

    let scenario = scenario(json!({
        "name": "type_mismatch",
        "actions": [{
            "name": "check_total",
            "type": "http_call",
            "params": {"url": "https://x"},
            "assert": {"type": "greater_than", "path": "$.total", "expected": 0}
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    let cause = verdict.cause.as_ref().unwrap();
    assert_eq!(cause.kind, "ASSERTION_FAILED");
    // A string "5" is a type mismatch, not a silent false
    assert!(cause.message.contains("TYPE_MISMATCH"), "{}", cause.message);

    // The handler output is still recorded alongside the failure
    let result = &verdict.actions[0];
    assert!(!result.succeeded());
    assert_eq!(result.output.as_ref().unwrap()["total"], json!("5"));
}

#[tokio::test]
async fn test_global_assertions_all_evaluated() {
    let mut engine = engine();
    let handler = ScriptedHandler::new(vec![Ok(json!({"status": "created"}))]);
    engine.register_handler("http_call", handler);

    let scenario = scenario(json!({
        "name": "globals",
        "actions": [{
            "name": "create",
            "type": "http_call",
            "params": {"url": "https://x"},
            "passToContext": {"status": "$.status"}
        }],
        "assertions": {
            "bad_one": {"type": "equals", "path": "$.actions[0].result.status", "expected": "done"},
            "bad_two": {"type": "exists", "path": "$.context.missing"},
            "good": {"type": "equals", "path": "$.context.status", "expected": "created"}
        }
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    // No short-circuit across named assertions: all three reported
    assert_eq!(verdict.assertions.len(), 3);
    assert!(!verdict.assertions["bad_one"].passed);
    assert!(!verdict.assertions["bad_two"].passed);
    assert!(verdict.assertions["good"].passed);

    let reason = verdict.reason();
    assert!(reason.contains("bad_one") && reason.contains("bad_two"));
}

// --- Retry and fallback ---

#[tokio::test]
async fn test_retry_recovers_transient_failures() {
    let mut engine = engine();
    let (flaky, calls) = FlakyHandler::new(2, None, json!({"ok": true}));
    engine.register_handler("flaky", flaky);

    let scenario = scenario(json!({
        "name": "retry",
        "actions": [{
            "name": "eventually_ok",
            "type": "flaky",
            "retry": {"maxAttempts": 3, "backoffSeconds": 0.01}
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed(), "{}", verdict.reason());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_on_allowlist_skips_other_codes() {
    let mut engine = engine();
    let (flaky, calls) = FlakyHandler::new(5, Some(404), json!({"ok": true}));
    engine.register_handler("flaky", flaky);

    let scenario = scenario(json!({
        "name": "no_retry_on_404",
        "actions": [{
            "name": "not_retryable",
            "type": "flaky",
            "retry": {"maxAttempts": 3, "backoffSeconds": 0.01, "retryOn": [503]}
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "404 must not retry");
}

#[tokio::test]
async fn test_on_failure_fallback_rescues_the_run() {
    let mut engine = engine();
    let failing = ScriptedHandler::new(vec![Err(HandlerError::new("primary down"))]);
    let (fallback, fallback_calls) = noop();
    let (after, after_calls) = noop();
    engine.register_handler("failing", failing);
    engine.register_handler("rescue", fallback);
    engine.register_handler("noop", after);

    let scenario = scenario(json!({
        "name": "rescued",
        "actions": [
            {
                "name": "primary",
                "type": "failing",
                "onFailure": {"name": "compensate", "type": "rescue"}
            },
            {"name": "after", "type": "noop"}
        ]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Passed, "{}", verdict.reason());
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    assert_eq!(after_calls.load(Ordering::SeqCst), 1);

    // The primary's failure stays in the log; the fallback's own result
    // is appended after it
    let primary = verdict.actions.iter().find(|r| r.name == "primary").unwrap();
    assert!(!primary.succeeded());
    let compensate = verdict
        .actions
        .iter()
        .find(|r| r.name == "compensate")
        .unwrap();
    assert!(compensate.succeeded());
}

#[tokio::test]
async fn test_failing_fallback_aborts_with_primary_cause() {
    let mut engine = engine();
    let failing = ScriptedHandler::new(vec![Err(HandlerError::new("primary down"))]);
    let bad_rescue = ScriptedHandler::new(vec![Err(HandlerError::new("rescue down"))]);
    engine.register_handler("failing", failing);
    engine.register_handler("rescue", bad_rescue);

    let scenario = scenario(json!({
        "name": "not_rescued",
        "actions": [{
            "name": "primary",
            "type": "failing",
            "onFailure": {"name": "compensate", "type": "rescue"}
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    assert!(verdict.cause.as_ref().unwrap().message.contains("primary"));
}

// --- Composites ---

#[tokio::test]
async fn test_loop_bound_exceeded_is_fatal() {
    let mut engine = engine();
    let (body, body_calls) = StaticHandler::new(json!({"status": "pending"}));
    engine.register_handler("check", body);

    // Context flag never flips, so the condition holds forever
    let seed = ScriptedHandler::new(vec![Ok(json!({"flag": true}))]);
    engine.register_handler("seed", seed);

    let scenario = scenario(json!({
        "name": "endless",
        "setup": [{
            "name": "seed_flag",
            "type": "seed",
            "passToContext": {"keep_going": "$.flag"}
        }],
        "actions": [{
            "name": "poll",
            "type": "loop",
            "condition": {"type": "equals", "path": "$.context.keep_going", "expected": true},
            "actions": [{"name": "check_once", "type": "check"}],
            "max_iterations": 3
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    assert_eq!(verdict.cause.as_ref().unwrap().kind, "LOOP_BOUND_EXCEEDED");
    assert_eq!(body_calls.load(Ordering::SeqCst), 3, "body ran exactly max_iterations times");
}

#[tokio::test]
async fn test_loop_exits_when_condition_flips() {
    let mut engine = engine();
    // Each iteration's output flows into context; the third says "done"
    let stepper = ScriptedHandler::new(vec![
        Ok(json!({"status": "pending"})),
        Ok(json!({"status": "pending"})),
        Ok(json!({"status": "done"})),
    ]);
    engine.register_handler("step", stepper.clone());

    let seed = ScriptedHandler::new(vec![Ok(json!({"status": "pending"}))]);
    engine.register_handler("seed", seed);

    let scenario = scenario(json!({
        "name": "bounded",
        "setup": [{
            "name": "seed_status",
            "type": "seed",
            "passToContext": {"status": "$.status"}
        }],
        "actions": [{
            "name": "poll_until_done",
            "type": "loop",
            "condition": {"type": "not_equals", "path": "$.context.status", "expected": "done"},
            "actions": [{
                "name": "advance",
                "type": "step",
                "passToContext": {"status": "$.status"}
            }],
            "max_iterations": 10
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed(), "{}", verdict.reason());
    assert_eq!(stepper.received().len(), 3);

    let loop_result = verdict
        .actions
        .iter()
        .find(|r| r.name == "poll_until_done")
        .unwrap();
    assert_eq!(loop_result.output.as_ref().unwrap()["iterations"], json!(3));
}

#[tokio::test]
async fn test_choice_takes_exactly_one_branch() {
    let mut engine = engine();
    let creator = ScriptedHandler::new(vec![Ok(json!({"status": "created"}))]);
    let (happy, happy_calls) = noop();
    let (sad, sad_calls) = noop();
    engine.register_handler("http_call", creator);
    engine.register_handler("happy_path", happy);
    engine.register_handler("sad_path", sad);

    let scenario = scenario(json!({
        "name": "branching",
        "actions": [
            {"name": "create", "type": "http_call", "params": {"url": "https://x"}},
            {
                "name": "route",
                "type": "choice",
                "condition": {"type": "equals", "path": "$.result.status", "expected": "created"},
                "if_true": [{"name": "celebrate", "type": "happy_path"}],
                "if_false": [{"name": "complain", "type": "sad_path"}]
            }
        ]
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed(), "{}", verdict.reason());
    assert_eq!(happy_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sad_calls.load(Ordering::SeqCst), 0);

    let route = verdict.actions.iter().find(|r| r.name == "route").unwrap();
    assert_eq!(route.output.as_ref().unwrap()["branch"], json!("if_true"));
}

#[tokio::test]
async fn test_parallel_failure_reports_lowest_failing_branch() {
    let mut engine = engine();
    let (ok, _) = noop();
    let failing = ScriptedHandler::new(vec![
        Err(HandlerError::new("b1 down")),
        Err(HandlerError::new("b2 down")),
    ]);
    engine.register_handler("noop", ok);
    engine.register_handler("failing", failing);

    let scenario = scenario(json!({
        "name": "fan_out",
        "actions": [{
            "name": "both",
            "type": "parallel",
            "branches": [
                [{"name": "b0_work", "type": "noop"}],
                [{"name": "b1_work", "type": "failing"}],
                [{"name": "b2_work", "type": "failing"}]
            ]
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    let cause = verdict.cause.as_ref().unwrap();
    assert!(
        cause.message.contains("parallel branch 1"),
        "lowest failing branch reported: {}",
        cause.message
    );

    // All branch results are recorded regardless
    assert!(verdict.actions.iter().any(|r| r.name == "b0_work"));
    assert!(verdict.actions.iter().any(|r| r.name == "b1_work"));
    assert!(verdict.actions.iter().any(|r| r.name == "b2_work"));
}

#[tokio::test]
async fn test_parallel_merges_context_in_declaration_order() {
    let mut engine = engine();
    let first = ScriptedHandler::new(vec![Ok(json!({"value": "from_b0"}))]);
    let second = ScriptedHandler::new(vec![Ok(json!({"value": "from_b1"}))]);
    engine.register_handler("first", first);
    engine.register_handler("second", second);

    let scenario = scenario(json!({
        "name": "merge_order",
        "actions": [{
            "name": "race",
            "type": "parallel",
            "branches": [
                [{"name": "b0", "type": "first", "passToContext": {"winner": "$.value"}}],
                [{"name": "b1", "type": "second", "passToContext": {"winner": "$.value"}}]
            ]
        }],
        "assertions": {
            "last_declared_wins": {
                "type": "equals", "path": "$.context.winner", "expected": "from_b1"
            }
        }
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed(), "{}", verdict.reason());
}

// --- Waits and cancellation ---

#[tokio::test]
async fn test_conditional_wait_succeeds_when_probe_flips() {
    let mut engine = engine();
    engine.register_probe("record_ready", CountProbe::new(2));

    let scenario = scenario(json!({
        "name": "eventually",
        "actions": [{
            "name": "wait_for_record",
            "type": "wait",
            "until": {
                "probe": "record_ready",
                "pollIntervalSeconds": 0.01,
                "maxWaitSeconds": 5
            }
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed(), "{}", verdict.reason());
    let wait = verdict.actions.iter().find(|r| r.name == "wait_for_record").unwrap();
    assert_eq!(wait.output.as_ref().unwrap()["polls"], json!(3));
}

#[tokio::test]
async fn test_conditional_wait_times_out() {
    let mut engine = engine();
    engine.register_probe("record_ready", Arc::new(NeverProbe));

    let scenario = scenario(json!({
        "name": "never",
        "actions": [{
            "name": "wait_for_record",
            "type": "wait",
            "until": {
                "probe": "record_ready",
                "pollIntervalSeconds": 0.01,
                "maxWaitSeconds": 0.05
            }
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    assert_eq!(verdict.cause.as_ref().unwrap().kind, "WAIT_TIMEOUT");
}

#[tokio::test]
async fn test_cancellation_interrupts_wait_and_runs_cleanup() {
    let mut engine = engine();
    let (cleanup, cleanup_calls) = noop();
    engine.register_handler("teardown", cleanup);

    let scenario = scenario(json!({
        "name": "cancelled_mid_wait",
        "actions": [{"name": "long_pause", "type": "wait", "seconds": 30}],
        "cleanup": [{"name": "clean", "type": "teardown"}]
    }));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let verdict = engine.run_with_cancel(&scenario, cancel).await;
    assert!(started.elapsed().as_secs() < 5, "cancellation must interrupt the sleep");

    assert_eq!(verdict.status, RunStatus::Cancelled);
    assert_eq!(verdict.cause.as_ref().unwrap().kind, "CANCELLED");
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1, "cleanup still runs");
}

#[tokio::test]
async fn test_scenario_timeout_cancels_the_run() {
    let mut engine = engine();

    let scenario = scenario(json!({
        "name": "deadline",
        "actions": [{"name": "long_pause", "type": "wait", "seconds": 30}],
        "metadata": {"timeoutSeconds": 0.05}
    }));

    let started = Instant::now();
    let verdict = engine.run(&scenario).await;
    assert!(started.elapsed().as_secs() < 5);
    assert_eq!(verdict.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_pre_cancelled_run_still_cleans_up() {
    let mut engine = engine();
    let (primary, primary_calls) = noop();
    let (cleanup, cleanup_calls) = noop();
    engine.register_handler("noop", primary);
    engine.register_handler("teardown", cleanup);

    let scenario = scenario(json!({
        "name": "cancelled_before_start",
        "actions": [{"name": "a", "type": "noop"}],
        "cleanup": [{"name": "clean", "type": "teardown"}]
    }));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let verdict = engine.run_with_cancel(&scenario, cancel).await;
    assert_eq!(verdict.status, RunStatus::Cancelled);
    assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1);
}

// --- Dispatch errors ---

#[tokio::test]
async fn test_unknown_action_type_is_a_dispatch_error() {
    let engine = engine();

    let scenario = scenario(json!({
        "name": "unknown",
        "actions": [{"name": "mystery", "type": "carrier_pigeon"}]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    let cause = verdict.cause.as_ref().unwrap();
    assert_eq!(cause.kind, "UNKNOWN_ACTION_TYPE");
    assert!(cause.message.contains("carrier_pigeon"));
}

#[tokio::test]
async fn test_pass_to_context_miss_is_fatal() {
    let mut engine = engine();
    let handler = ScriptedHandler::new(vec![Ok(json!({"body": {}}))]);
    engine.register_handler("http_call", handler);

    let scenario = scenario(json!({
        "name": "bad_projection",
        "actions": [{
            "name": "create",
            "type": "http_call",
            "params": {"url": "https://x"},
            "passToContext": {"orderId": "$.body.orderId"}
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert_eq!(verdict.status, RunStatus::Failed);
    assert_eq!(verdict.cause.as_ref().unwrap().kind, "PATH_NOT_FOUND");
}

// --- Built-in kv handler + probe end to end ---

#[tokio::test]
async fn test_kv_seed_then_conditional_wait_flow() {
    let mut engine = engine();
    let store = scenario::handlers::KvStore::default();
    engine.register_handler(
        "kv_interact",
        Arc::new(scenario::handlers::KvInteractHandler::new(store.clone())),
    );
    engine.register_probe(
        "kv_item",
        Arc::new(scenario::handlers::KvItemProbe::new(store)),
    );

    let scenario = scenario(json!({
        "name": "kv_flow",
        "setup": [{
            "name": "seed_order",
            "type": "kv_interact",
            "params": {
                "table": "orders", "operation": "put_item",
                "key": "o1", "item": {"status": "processing"}
            }
        }],
        "actions": [
            {
                "name": "wait_for_order",
                "type": "wait",
                "until": {
                    "probe": "kv_item",
                    "params": {
                        "table": "orders", "key": "o1",
                        "path": "$.status", "expected": "processing"
                    },
                    "pollIntervalSeconds": 0.01,
                    "maxWaitSeconds": 2
                }
            },
            {
                "name": "read_order",
                "type": "kv_interact",
                "params": {"table": "orders", "operation": "get_item", "key": "o1"},
                "assert": {"type": "equals", "path": "$.item.status", "expected": "processing"}
            }
        ],
        "cleanup": [{
            "name": "remove_order",
            "type": "kv_interact",
            "params": {"table": "orders", "operation": "delete_item", "key": "o1"}
        }]
    }));

    let verdict = engine.run(&scenario).await;
    assert!(verdict.passed(), "{}", verdict.reason());

    let removed = verdict.actions.iter().find(|r| r.name == "remove_order").unwrap();
    assert_eq!(removed.output.as_ref().unwrap()["deleted"], json!(true));
}
