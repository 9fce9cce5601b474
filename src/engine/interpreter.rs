//! Control-flow interpreter
//!
//! Drives one scenario run through its phases:
//! `Setup → Actions → GlobalAssertions → Cleanup`. Composite actions
//! (`choice`, `loop`, `parallel`, `wait`) recurse into the interpreter;
//! invoke actions go through the dispatcher. Cleanup is unconditional and
//! best-effort, and runs on a detached cancellation scope so a cancelled
//! run still cleans up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::{Error, ErrorDetail};
use crate::scenario::{Action, ActionKind, AssertionSpec, RetryPolicy, Scenario, WaitSpec, WaitUntil};

use super::assertion::{self, AssertionOutcome};
use super::context::ExecutionContext;
use super::dispatch::dispatch_invoke;
use super::resolver::{resolve_params, ResolveScope};
use super::verdict::{ActionOutcome, ActionResult, RunPhase, Verdict};
use super::Engine;

/// Shared state of one scenario run
#[derive(Clone)]
pub(crate) struct RunState<'e> {
    pub engine: &'e Engine,
    pub log: Arc<Mutex<Vec<ActionResult>>>,
    pub cancel: CancellationToken,
    pub default_retry: Option<RetryPolicy>,
}

impl<'e> RunState<'e> {
    pub(crate) fn push(&self, result: ActionResult) {
        self.log.lock().push(result);
    }

    pub(crate) fn success(
        &self,
        action: &Action,
        phase: RunPhase,
        output: Option<Value>,
    ) -> ActionResult {
        ActionResult {
            name: action.name.clone(),
            phase,
            outcome: ActionOutcome::Success,
            output,
            assertion: None,
            timestamp: self.engine.providers().now(),
            error: None,
        }
    }

    pub(crate) fn failure(
        &self,
        action: &Action,
        phase: RunPhase,
        output: Option<Value>,
        assertion: Option<AssertionOutcome>,
        error: &Error,
    ) -> ActionResult {
        self.failure_with(action, phase, output, assertion, ErrorDetail::from(error))
    }

    pub(crate) fn failure_with(
        &self,
        action: &Action,
        phase: RunPhase,
        output: Option<Value>,
        assertion: Option<AssertionOutcome>,
        detail: ErrorDetail,
    ) -> ActionResult {
        warn!(action = %action.name, kind = %detail.kind, "action failed: {}", detail.message);
        ActionResult {
            name: action.name.clone(),
            phase,
            outcome: ActionOutcome::Failure,
            output,
            assertion,
            timestamp: self.engine.providers().now(),
            error: Some(detail),
        }
    }
}

/// Execute one scenario and aggregate its verdict
pub(crate) async fn run_scenario(
    engine: &Engine,
    scenario: &Scenario,
    cancel: CancellationToken,
) -> Verdict {
    let ctx = ExecutionContext::new(engine.env().clone(), Arc::clone(engine.providers()));
    info!(scenario = %scenario.name, run_id = %ctx.run_id(), "starting run");

    let default_retry = scenario
        .metadata
        .retry_defaults
        .clone()
        .or_else(|| engine.config_retry_policy());
    let state = RunState {
        engine,
        log: Arc::new(Mutex::new(Vec::new())),
        cancel,
        default_retry,
    };

    let mut cause: Option<ErrorDetail> = None;
    let mut last: Option<Value> = None;

    if let Err(detail) = run_list(&state, &ctx, &scenario.setup, RunPhase::Setup, &mut last).await {
        cause = Some(detail);
    }

    if cause.is_none() {
        if let Err(detail) =
            run_list(&state, &ctx, &scenario.actions, RunPhase::Actions, &mut last).await
        {
            cause = Some(detail);
        }
    }

    // Global assertions run only when setup and every action passed; every
    // named entry is evaluated so the verdict reports all failing checks.
    let mut assertions = BTreeMap::new();
    if cause.is_none() && !scenario.assertions.is_empty() {
        let log_json = serde_json::to_value(&*state.log.lock()).unwrap_or(Value::Null);
        let root = json!({"actions": log_json, "context": ctx.vars_as_json()});
        for (name, spec) in &scenario.assertions {
            let outcome = assertion::evaluate(spec, &root);
            if outcome.passed {
                debug!(assertion = %name, "global assertion passed");
            } else {
                warn!(assertion = %name, "global assertion failed: {}", outcome.reason);
            }
            assertions.insert(name.clone(), outcome);
        }
    }

    let cancelled = cause.as_ref().map_or(false, |c| c.kind == "CANCELLED");

    // Cleanup runs unconditionally. A fresh token detaches it from the
    // run's cancellation so cancelled runs still clean up; failures are
    // recorded but never escalate.
    if !scenario.cleanup.is_empty() {
        let cleanup_state = RunState {
            cancel: CancellationToken::new(),
            ..state.clone()
        };
        let mut cleanup_last = None;
        for action in &scenario.cleanup {
            if execute_action(
                &cleanup_state,
                &ctx,
                action,
                RunPhase::Cleanup,
                &mut cleanup_last,
            )
            .await
            .is_err()
            {
                warn!(action = %action.name, "cleanup action failed (verdict unchanged)");
            }
        }
    }

    let actions = std::mem::take(&mut *state.log.lock());
    let verdict = Verdict::aggregate(actions, assertions, cause, cancelled);
    info!(
        scenario = %scenario.name,
        status = ?verdict.status,
        "run finished: {}",
        verdict.reason()
    );
    verdict
}

/// Execute a sequential action list, stopping at the first failure
async fn run_list<'e>(
    state: &RunState<'e>,
    ctx: &ExecutionContext,
    actions: &[Action],
    phase: RunPhase,
    last: &mut Option<Value>,
) -> Result<(), ErrorDetail> {
    for action in actions {
        execute_action(state, ctx, action, phase, last).await?;
    }
    Ok(())
}

/// Execute one action, including its onFailure rescue path.
///
/// Returns `Err` with the failure detail when the action failed and was
/// not rescued; the caller aborts the phase on `Err`.
fn execute_action<'a, 'e: 'a>(
    state: &'a RunState<'e>,
    ctx: &'a ExecutionContext,
    action: &'a Action,
    phase: RunPhase,
    last: &'a mut Option<Value>,
) -> BoxFuture<'a, Result<(), ErrorDetail>> {
    async move {
        let outcome = match &action.kind {
            ActionKind::Invoke {
                action_type,
                params,
            } => {
                let result = dispatch_invoke(state, ctx, action, action_type, params, phase).await;
                let detail = result.error.clone();
                if result.succeeded() {
                    *last = result.output.clone();
                }
                state.push(result);
                match detail {
                    None => Ok(()),
                    Some(detail) => Err(detail),
                }
            }
            ActionKind::Wait(spec) => {
                let result = run_wait(state, ctx, action, spec, phase).await;
                let detail = result.error.clone();
                state.push(result);
                match detail {
                    None => Ok(()),
                    Some(detail) => Err(detail),
                }
            }
            ActionKind::Parallel { branches } => {
                run_parallel(state, ctx, action, branches, phase).await
            }
            ActionKind::Choice {
                condition,
                if_true,
                if_false,
            } => run_choice(state, ctx, action, condition, if_true, if_false, phase, last).await,
            ActionKind::Loop {
                condition,
                actions,
                max_iterations,
            } => run_loop(state, ctx, action, condition, actions, *max_iterations, phase, last).await,
        };

        let Err(detail) = outcome else {
            return Ok(());
        };

        // A configured fallback rescues the phase when it succeeds; the
        // primary's failure stays in the log either way.
        if let Some(fallback) = &action.on_failure {
            if detail.kind != "CANCELLED" && !state.cancel.is_cancelled() {
                info!(
                    action = %action.name,
                    fallback = %fallback.name,
                    "primary failed, running onFailure fallback"
                );
                let mut fallback_last = None;
                if execute_action(state, ctx, fallback, phase, &mut fallback_last)
                    .await
                    .is_ok()
                {
                    return Ok(());
                }
            }
        }

        Err(detail)
    }
    .boxed()
}

/// Fixed sleep or conditional poll, both cancellable
async fn run_wait<'e>(
    state: &RunState<'e>,
    ctx: &ExecutionContext,
    action: &Action,
    spec: &WaitSpec,
    phase: RunPhase,
) -> ActionResult {
    if state.cancel.is_cancelled() {
        return state.failure(
            action,
            phase,
            None,
            None,
            &Error::Cancelled("cancellation observed before wait".into()),
        );
    }

    match spec {
        WaitSpec::Fixed { seconds } => {
            let seconds = seconds.max(0.0);
            debug!(action = %action.name, seconds, "fixed wait");
            tokio::select! {
                _ = sleep(Duration::from_secs_f64(seconds)) => {
                    state.success(action, phase, Some(json!({"waitedSeconds": seconds})))
                }
                _ = state.cancel.cancelled() => state.failure(
                    action,
                    phase,
                    None,
                    None,
                    &Error::Cancelled("cancellation observed during wait".into()),
                ),
            }
        }
        WaitSpec::Conditional(until) => run_conditional_wait(state, ctx, action, until, phase).await,
    }
}

async fn run_conditional_wait<'e>(
    state: &RunState<'e>,
    ctx: &ExecutionContext,
    action: &Action,
    until: &WaitUntil,
    phase: RunPhase,
) -> ActionResult {
    // Condition params resolve once per wait, not once per poll
    let scope = ResolveScope::new(ctx);
    let params = match resolve_params(&until.params, &scope) {
        Ok(params) => params,
        Err(e) => return state.failure(action, phase, None, None, &e),
    };

    let Some(probe) = state.engine.registry().probe(&until.probe) else {
        return state.failure(
            action,
            phase,
            None,
            None,
            &Error::UnknownActionType(format!("wait probe '{}'", until.probe)),
        );
    };

    let defaults = &state.engine.config().defaults;
    let interval = until
        .poll_interval_seconds
        .unwrap_or(defaults.poll_interval_secs)
        .max(0.0);
    let max_wait = until
        .max_wait_seconds
        .unwrap_or(defaults.max_wait_secs)
        .max(0.0);

    let snapshot = ctx.snapshot();
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        match probe.check(&params, &snapshot).await {
            Ok(true) => {
                debug!(action = %action.name, polls, "wait condition satisfied");
                return state.success(
                    action,
                    phase,
                    Some(json!({
                        "polls": polls + 1,
                        "waitedSeconds": started.elapsed().as_secs_f64()
                    })),
                );
            }
            Ok(false) => {}
            Err(failure) => {
                return state.failure(
                    action,
                    phase,
                    None,
                    None,
                    &Error::HandlerFailure {
                        action: action.name.clone(),
                        message: failure.message,
                        status_code: failure.status_code,
                    },
                );
            }
        }
        polls += 1;

        if started.elapsed().as_secs_f64() >= max_wait {
            return state.failure(
                action,
                phase,
                None,
                None,
                &Error::WaitTimeout {
                    action: action.name.clone(),
                    max_wait_seconds: max_wait,
                },
            );
        }

        tokio::select! {
            _ = sleep(Duration::from_secs_f64(interval)) => {}
            _ = state.cancel.cancelled() => {
                return state.failure(
                    action,
                    phase,
                    None,
                    None,
                    &Error::Cancelled("cancellation observed during wait poll".into()),
                );
            }
        }
    }
}

/// Concurrent branches over forked contexts, merged in declaration order
async fn run_parallel<'e>(
    state: &RunState<'e>,
    ctx: &ExecutionContext,
    action: &Action,
    branches: &[Vec<Action>],
    phase: RunPhase,
) -> Result<(), ErrorDetail> {
    debug!(action = %action.name, branches = branches.len(), "parallel fan-out");

    let forks: Vec<ExecutionContext> = branches.iter().map(|_| ctx.fork()).collect();
    let tasks = branches.iter().zip(forks.iter()).map(|(branch, fork)| async move {
        let mut last = None;
        for inner in branch {
            execute_action(state, fork, inner, phase, &mut last).await?;
        }
        Ok::<(), ErrorDetail>(())
    });
    let results = join_all(tasks).await;

    // Branch writes merge in declaration order, so colliding context keys
    // resolve deterministically regardless of completion order
    for fork in &forks {
        ctx.merge(fork.take_delta());
    }

    let first_failure = results
        .iter()
        .enumerate()
        .find_map(|(i, r)| r.as_ref().err().map(|detail| (i, detail.clone())));

    match first_failure {
        None => {
            state.push(state.success(
                action,
                phase,
                Some(json!({"branches": branches.len()})),
            ));
            Ok(())
        }
        Some((index, inner)) => {
            let detail = ErrorDetail {
                kind: inner.kind,
                message: format!("parallel branch {index}: {}", inner.message),
            };
            state.push(state.failure_with(action, phase, None, None, detail.clone()));
            Err(detail)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_choice<'e>(
    state: &RunState<'e>,
    ctx: &ExecutionContext,
    action: &Action,
    condition: &AssertionSpec,
    if_true: &[Action],
    if_false: &[Action],
    phase: RunPhase,
    last: &mut Option<Value>,
) -> Result<(), ErrorDetail> {
    let root = condition_root(ctx, last);
    let outcome = assertion::evaluate(condition, &root);
    let branch_name = if outcome.passed { "if_true" } else { "if_false" };
    debug!(action = %action.name, branch = branch_name, "choice: {}", outcome.reason);

    state.push(state.success(
        action,
        phase,
        Some(json!({"branch": branch_name, "condition": outcome.reason})),
    ));

    let chosen = if outcome.passed { if_true } else { if_false };
    for inner in chosen {
        execute_action(state, ctx, inner, phase, last).await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_loop<'e>(
    state: &RunState<'e>,
    ctx: &ExecutionContext,
    action: &Action,
    condition: &AssertionSpec,
    body: &[Action],
    max_iterations: u32,
    phase: RunPhase,
    last: &mut Option<Value>,
) -> Result<(), ErrorDetail> {
    let mut iterations = 0u32;
    loop {
        let root = condition_root(ctx, last);
        if !assertion::evaluate(condition, &root).passed {
            break;
        }

        // The bound is a hard failure, never a silent exit
        if iterations >= max_iterations {
            let error = Error::LoopBoundExceeded {
                action: action.name.clone(),
                max_iterations,
            };
            let detail = ErrorDetail::from(&error);
            state.push(state.failure_with(
                action,
                phase,
                Some(json!({"iterations": iterations})),
                None,
                detail.clone(),
            ));
            return Err(detail);
        }

        debug!(action = %action.name, iteration = iterations, "loop iteration");
        for inner in body {
            execute_action(state, ctx, inner, phase, last).await?;
        }
        iterations += 1;
    }

    state.push(state.success(action, phase, Some(json!({"iterations": iterations}))));
    Ok(())
}

/// Document choice/loop conditions evaluate against
fn condition_root(ctx: &ExecutionContext, last: &Option<Value>) -> Value {
    json!({
        "context": ctx.vars_as_json(),
        "result": last.clone().unwrap_or(Value::Null)
    })
}
