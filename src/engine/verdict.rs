//! Execution log and verdict types
//!
//! Every executed action appends one [`ActionResult`] to the run log in
//! actual execution order; the aggregated [`Verdict`] is the engine's
//! result-sink payload. The log's JSON form is also the document global
//! assertions address as `$.actions[i].result…`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::ErrorDetail;

use super::assertion::AssertionOutcome;

/// Phase an action executed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Setup,
    Actions,
    Cleanup,
}

/// Outcome of one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failure,
}

/// One entry of the append-only execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub name: String,
    pub phase: RunPhase,
    pub outcome: ActionOutcome,
    /// Raw handler output, addressable as `$.actions[i].result…`
    #[serde(rename = "result", skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Per-action assertion outcome, if the action declared one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionOutcome>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl ActionResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == ActionOutcome::Success
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Cancelled,
}

/// Final result of one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: RunStatus,
    /// Ordered execution log, cleanup included
    pub actions: Vec<ActionResult>,
    /// Global assertion outcomes by name
    pub assertions: BTreeMap<String, AssertionOutcome>,
    /// Terminal cause when the run aborted before completing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorDetail>,
}

impl Verdict {
    /// Combine phase outcomes into the final verdict.
    ///
    /// A run passes iff setup and every primary action succeeded (or was
    /// rescued by a fallback) and every global assertion passed. Cleanup
    /// outcomes never change the status.
    pub fn aggregate(
        actions: Vec<ActionResult>,
        assertions: BTreeMap<String, AssertionOutcome>,
        cause: Option<ErrorDetail>,
        cancelled: bool,
    ) -> Self {
        let status = if cancelled {
            RunStatus::Cancelled
        } else if cause.is_some() || assertions.values().any(|a| !a.passed) {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };

        Self {
            status,
            actions,
            assertions,
            cause,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// Concrete, human-readable reason for the status — never a bare
    /// boolean.
    pub fn reason(&self) -> String {
        match self.status {
            RunStatus::Passed => format!(
                "{} action(s) and {} assertion(s) passed",
                self.actions.len(),
                self.assertions.len()
            ),
            RunStatus::Cancelled => match &self.cause {
                Some(cause) => format!("{}: {}", cause.kind, cause.message),
                None => "CANCELLED: run cancelled".to_string(),
            },
            RunStatus::Failed => {
                if let Some(cause) = &self.cause {
                    return format!("{}: {}", cause.kind, cause.message);
                }
                let failing: Vec<String> = self
                    .assertions
                    .iter()
                    .filter(|(_, outcome)| !outcome.passed)
                    .map(|(name, outcome)| format!("assertion '{name}' failed: {}", outcome.reason))
                    .collect();
                if failing.is_empty() {
                    "run failed".to_string()
                } else {
                    failing.join("; ")
                }
            }
        }
    }
}
