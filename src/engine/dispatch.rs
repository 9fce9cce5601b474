//! Action dispatcher
//!
//! Executes one invoke action: resolve placeholders, select the handler
//! capability for the action's type, invoke it under the retry policy,
//! evaluate the per-action assertion, and project outputs into context.
//! Handlers are an open set: adding an action type is a registration,
//! never an interpreter change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::common::{Error, ErrorDetail};
use crate::scenario::{Action, BackoffMode, RetryPolicy};

use super::assertion;
use super::context::{ContextSnapshot, ExecutionContext};
use super::interpreter::RunState;
use super::path;
use super::resolver::{resolve_params, ResolveScope};
use super::verdict::{ActionOutcome, ActionResult, RunPhase};

/// Failure reported by an external handler capability
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    /// Status code used against a retry policy's `retryOn` allowlist
    pub status_code: Option<u16>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
        }
    }
}

/// An external action capability, registered by type name
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        params: &Value,
        ctx: &ContextSnapshot,
    ) -> std::result::Result<Value, HandlerError>;
}

/// A conditional-wait predicate capability, polled by the interpreter
#[async_trait]
pub trait WaitProbe: Send + Sync {
    async fn check(
        &self,
        params: &Value,
        ctx: &ContextSnapshot,
    ) -> std::result::Result<bool, HandlerError>;
}

/// Registry of handler and probe capabilities
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    probes: HashMap<String, Arc<dyn WaitProbe>>,
}

impl HandlerRegistry {
    pub fn register(&mut self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type.into(), handler);
    }

    pub fn register_probe(&mut self, name: impl Into<String>, probe: Arc<dyn WaitProbe>) {
        self.probes.insert(name.into(), probe);
    }

    pub fn handler(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }

    pub fn probe(&self, name: &str) -> Option<&Arc<dyn WaitProbe>> {
        self.probes.get(name)
    }
}

/// Execute one invoke action to completion and return its log entry.
///
/// The entry is not appended here; the interpreter owns log order.
pub(crate) async fn dispatch_invoke(
    state: &RunState<'_>,
    ctx: &ExecutionContext,
    action: &Action,
    action_type: &str,
    params: &Value,
    phase: RunPhase,
) -> ActionResult {
    // Cancellation is observed before any work
    if state.cancel.is_cancelled() {
        return state.failure(
            action,
            phase,
            None,
            None,
            &Error::Cancelled("cancellation observed before dispatch".into()),
        );
    }

    // Resolve placeholders; an unresolvable action never dispatches
    let scope = ResolveScope::new(ctx);
    let resolved = match resolve_params(params, &scope) {
        Ok(resolved) => resolved,
        Err(e) => return state.failure(action, phase, None, None, &e),
    };

    let Some(handler) = state.engine.registry().handler(action_type) else {
        return state.failure(
            action,
            phase,
            None,
            None,
            &Error::UnknownActionType(action_type.to_string()),
        );
    };

    let policy = action.retry.as_ref().or(state.default_retry.as_ref());
    let max_attempts = policy.map(|p| p.max_attempts.max(1)).unwrap_or(1);
    let snapshot = ctx.snapshot();

    let mut attempt = 1;
    let output = loop {
        debug!(action = %action.name, action_type, attempt, "dispatching action");
        match handler.execute(&resolved, &snapshot).await {
            Ok(output) => break output,
            Err(failure) => {
                let error = Error::HandlerFailure {
                    action: action.name.clone(),
                    message: failure.message.clone(),
                    status_code: failure.status_code,
                };
                if attempt >= max_attempts || !retry_allows(policy, &failure) {
                    return state.failure(action, phase, None, None, &error);
                }

                let delay = backoff_delay(policy, attempt);
                warn!(
                    action = %action.name,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "handler failed, retrying: {}",
                    failure.message
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = state.cancel.cancelled() => {
                        return state.failure(
                            action,
                            phase,
                            None,
                            None,
                            &Error::Cancelled("cancellation observed during retry backoff".into()),
                        );
                    }
                }
                attempt += 1;
            }
        }
    };

    // A failing assertion downgrades the action even though the handler
    // itself succeeded
    let assertion_outcome = action
        .assert
        .as_ref()
        .map(|spec| assertion::evaluate(spec, &output));
    if let Some(outcome) = &assertion_outcome {
        if !outcome.passed {
            return state.failure_with(
                action,
                phase,
                Some(output),
                assertion_outcome.clone(),
                ErrorDetail {
                    kind: "ASSERTION_FAILED".to_string(),
                    message: format!("action '{}': {}", action.name, outcome.reason),
                },
            );
        }
    }

    // Project outputs into context; extraction misses are fatal here
    if let Some(mapping) = &action.pass_to_context {
        for (name, expr) in mapping {
            match path::extract(expr, &output) {
                Ok(extracted) => ctx.set(name, extracted.into_value()),
                Err(e) => {
                    return state.failure(action, phase, Some(output), assertion_outcome, &e)
                }
            }
        }
    }

    ActionResult {
        name: action.name.clone(),
        phase,
        outcome: ActionOutcome::Success,
        output: Some(output),
        assertion: assertion_outcome,
        timestamp: state.engine.providers().now(),
        error: None,
    }
}

fn retry_allows(policy: Option<&RetryPolicy>, failure: &HandlerError) -> bool {
    let Some(policy) = policy else {
        return false;
    };
    match &policy.retry_on {
        Some(allowed) => failure
            .status_code
            .map(|code| allowed.contains(&code))
            .unwrap_or(false),
        None => true,
    }
}

fn backoff_delay(policy: Option<&RetryPolicy>, attempt: u32) -> Duration {
    let Some(policy) = policy else {
        return Duration::ZERO;
    };
    let base = policy.backoff_seconds.max(0.0);
    let seconds = match policy.backoff {
        BackoffMode::Fixed => base,
        BackoffMode::Exponential => base * 2f64.powi(attempt as i32 - 1),
    };
    Duration::from_secs_f64(seconds)
}
