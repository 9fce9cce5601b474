//! Scenario configuration types
//!
//! Defines the data structures for deserializing JSON/YAML scenarios.
//! Composite action types (`wait`, `parallel`, `choice`, `loop`) are
//! interpreted by the engine itself; every other `type` string is an
//! invoke action dispatched through the handler registry.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Context names owned by the runner; `passToContext` must not shadow them
pub const RESERVED_CONTEXT_NAMES: [&str; 4] = ["env", "testRunId", "now", "random"];

/// A complete scenario loaded from a JSON or YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Actions run before the primary sequence (e.g. seeding records)
    #[serde(default)]
    pub setup: Vec<Action>,
    /// The primary action sequence
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Named global assertions evaluated after all actions passed
    #[serde(default)]
    pub assertions: BTreeMap<String, AssertionSpec>,
    /// Actions run unconditionally after the run, best-effort
    #[serde(default)]
    pub cleanup: Vec<Action>,
    /// Run-level metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Run-level metadata
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Overall deadline for the run; exceeding it cancels the run
    pub timeout_seconds: Option<f64>,
    /// Retry policy for actions that don't declare one
    pub retry_defaults: Option<RetryPolicy>,
    /// Free-form tags for suite filtering
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One addressable unit of work in a scenario
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawAction")]
pub struct Action {
    /// Name, unique within the scenario, used for addressing results
    pub name: String,
    /// What this action does
    pub kind: ActionKind,
    /// Assertion evaluated against the handler output; failure downgrades
    /// the action to a failure even if the handler succeeded
    pub assert: Option<AssertionSpec>,
    /// Named path extractions applied to the output and written to context
    pub pass_to_context: Option<BTreeMap<String, String>>,
    /// Retry policy for handler failures
    pub retry: Option<RetryPolicy>,
    /// Best-effort fallback executed after the primary fails
    pub on_failure: Option<Box<Action>>,
}

/// Classification of an action at the dispatcher boundary
#[derive(Debug, Clone)]
pub enum ActionKind {
    /// Dispatched to the registered handler for `action_type`
    Invoke { action_type: String, params: Value },
    /// Suspend for a fixed duration or until a probe reports true
    Wait(WaitSpec),
    /// Concurrent branches, all of which must succeed
    Parallel { branches: Vec<Vec<Action>> },
    /// Run exactly one of two branches depending on a condition
    Choice {
        condition: AssertionSpec,
        if_true: Vec<Action>,
        if_false: Vec<Action>,
    },
    /// Repeat a body while a condition holds, bounded by max_iterations
    Loop {
        condition: AssertionSpec,
        actions: Vec<Action>,
        max_iterations: u32,
    },
}

/// Wait behavior: fixed sleep or conditional poll
#[derive(Debug, Clone)]
pub enum WaitSpec {
    Fixed { seconds: f64 },
    Conditional(WaitUntil),
}

/// Conditional-wait configuration
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WaitUntil {
    /// Registered probe capability polled for the condition
    pub probe: String,
    /// Opaque condition spec passed to the probe (placeholders allowed)
    #[serde(default = "empty_params")]
    pub params: Value,
    /// Seconds between polls (config default if unset)
    pub poll_interval_seconds: Option<f64>,
    /// Bound on the total wait (config default if unset)
    pub max_wait_seconds: Option<f64>,
}

/// Retry policy for handler failures
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base sleep between attempts
    #[serde(default)]
    pub backoff_seconds: f64,
    /// Fixed sleeps or doubling per attempt
    #[serde(default)]
    pub backoff: BackoffMode,
    /// When set, only handler failures with one of these status codes retry
    pub retry_on: Option<Vec<u16>>,
}

fn default_max_attempts() -> u32 {
    1
}

/// Backoff growth between retry attempts
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    #[default]
    Fixed,
    Exponential,
}

/// An assertion over a structured value
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionSpec {
    /// Structural equality, no coercion
    Equals { path: String, expected: Value },
    /// Structural inequality, no coercion
    NotEquals { path: String, expected: Value },
    /// Substring for strings, membership for arrays, key presence for objects
    Contains { path: String, expected: Value },
    /// The path resolves to some value
    Exists { path: String },
    /// Numeric comparison; non-numeric operands are a type mismatch
    GreaterThan { path: String, expected: Value },
    /// Numeric comparison; non-numeric operands are a type mismatch
    LessThan { path: String, expected: Value },
    /// All conditions hold (short-circuits on the first failure)
    And { conditions: Vec<AssertionSpec> },
    /// Any condition holds (short-circuits on the first success)
    Or { conditions: Vec<AssertionSpec> },
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Raw wire form of an action, classified into [`ActionKind`] after parse
#[derive(Deserialize, Debug)]
struct RawAction {
    name: String,
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default = "empty_params")]
    params: Value,
    // wait
    seconds: Option<f64>,
    until: Option<WaitUntil>,
    // parallel
    branches: Option<Vec<Vec<Action>>>,
    // choice / loop
    condition: Option<AssertionSpec>,
    if_true: Option<Vec<Action>>,
    if_false: Option<Vec<Action>>,
    actions: Option<Vec<Action>>,
    max_iterations: Option<u32>,
    // common
    assert: Option<AssertionSpec>,
    #[serde(rename = "passToContext")]
    pass_to_context: Option<BTreeMap<String, String>>,
    retry: Option<RetryPolicy>,
    #[serde(rename = "onFailure")]
    on_failure: Option<Box<Action>>,
}

impl TryFrom<RawAction> for Action {
    type Error = String;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let action_type = raw.action_type;
        let kind = if action_type == "wait" {
            match (raw.seconds, raw.until) {
                (Some(seconds), None) => ActionKind::Wait(WaitSpec::Fixed { seconds }),
                (None, Some(until)) => ActionKind::Wait(WaitSpec::Conditional(until)),
                (Some(_), Some(_)) => {
                    return Err(format!(
                        "wait action '{}' must set either 'seconds' or 'until', not both",
                        raw.name
                    ))
                }
                (None, None) => {
                    return Err(format!(
                        "wait action '{}' requires 'seconds' or 'until'",
                        raw.name
                    ))
                }
            }
        } else if action_type == "parallel" {
            ActionKind::Parallel {
                branches: raw.branches.ok_or_else(|| {
                    format!("parallel action '{}' requires 'branches'", raw.name)
                })?,
            }
        } else if action_type == "choice" {
            ActionKind::Choice {
                condition: raw.condition.ok_or_else(|| {
                    format!("choice action '{}' requires 'condition'", raw.name)
                })?,
                if_true: raw.if_true.unwrap_or_default(),
                if_false: raw.if_false.unwrap_or_default(),
            }
        } else if action_type == "loop" {
            ActionKind::Loop {
                condition: raw.condition.ok_or_else(|| {
                    format!("loop action '{}' requires 'condition'", raw.name)
                })?,
                actions: raw.actions.ok_or_else(|| {
                    format!("loop action '{}' requires 'actions'", raw.name)
                })?,
                max_iterations: raw.max_iterations.ok_or_else(|| {
                    format!("loop action '{}' requires 'max_iterations'", raw.name)
                })?,
            }
        } else {
            // Anything else is resolved against the handler registry at
            // dispatch time, so new action types need no parser change.
            ActionKind::Invoke {
                action_type,
                params: raw.params,
            }
        };

        Ok(Action {
            name: raw.name,
            kind,
            assert: raw.assert,
            pass_to_context: raw.pass_to_context,
            retry: raw.retry,
            on_failure: raw.on_failure,
        })
    }
}

impl Action {
    /// The wire-level type name of this action
    pub fn type_name(&self) -> &str {
        match &self.kind {
            ActionKind::Invoke { action_type, .. } => action_type,
            ActionKind::Wait(_) => "wait",
            ActionKind::Parallel { .. } => "parallel",
            ActionKind::Choice { .. } => "choice",
            ActionKind::Loop { .. } => "loop",
        }
    }
}
