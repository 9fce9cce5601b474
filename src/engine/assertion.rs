//! Assertion evaluator
//!
//! Applies comparison predicates to values selected by path expressions.
//! Evaluation never panics the run: extraction errors become hard-fail
//! outcomes with the path error as the reason.

use serde_json::Value;

use crate::common::Error;
use crate::scenario::AssertionSpec;

use super::path;

/// Result of evaluating one assertion
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub reason: String,
}

impl AssertionOutcome {
    fn pass(reason: String) -> Self {
        Self {
            passed: true,
            reason,
        }
    }

    fn fail(reason: String) -> Self {
        Self {
            passed: false,
            reason,
        }
    }
}

/// Evaluate an assertion against a result document
pub fn evaluate(spec: &AssertionSpec, root: &Value) -> AssertionOutcome {
    match spec {
        AssertionSpec::Equals { path, expected } => match lookup(path, root) {
            Ok(actual) if &actual == expected => {
                AssertionOutcome::pass(format!("'{path}' equals {}", preview(expected)))
            }
            Ok(actual) => AssertionOutcome::fail(format!(
                "'{path}': expected {}, got {}",
                preview(expected),
                preview(&actual)
            )),
            Err(reason) => AssertionOutcome::fail(reason),
        },

        AssertionSpec::NotEquals { path, expected } => match lookup(path, root) {
            Ok(actual) if &actual != expected => {
                AssertionOutcome::pass(format!("'{path}' differs from {}", preview(expected)))
            }
            Ok(_) => AssertionOutcome::fail(format!(
                "'{path}': expected anything but {}",
                preview(expected)
            )),
            Err(reason) => AssertionOutcome::fail(reason),
        },

        AssertionSpec::Contains { path, expected } => match lookup(path, root) {
            Ok(actual) => check_contains(path, &actual, expected),
            Err(reason) => AssertionOutcome::fail(reason),
        },

        AssertionSpec::Exists { path } => match path::exists(path, root) {
            Ok(true) => AssertionOutcome::pass(format!("'{path}' exists")),
            Ok(false) => AssertionOutcome::fail(format!("'{path}' does not exist")),
            Err(e) => AssertionOutcome::fail(e.to_string()),
        },

        AssertionSpec::GreaterThan { path, expected } => {
            check_order(path, root, expected, "greater_than", |a, b| a > b)
        }

        AssertionSpec::LessThan { path, expected } => {
            check_order(path, root, expected, "less_than", |a, b| a < b)
        }

        AssertionSpec::And { conditions } => {
            for (i, condition) in conditions.iter().enumerate() {
                let outcome = evaluate(condition, root);
                if !outcome.passed {
                    return AssertionOutcome::fail(format!(
                        "and[{i}] failed: {}",
                        outcome.reason
                    ));
                }
            }
            AssertionOutcome::pass(format!("all {} conditions passed", conditions.len()))
        }

        AssertionSpec::Or { conditions } => {
            let mut first_failure = None;
            for (i, condition) in conditions.iter().enumerate() {
                let outcome = evaluate(condition, root);
                if outcome.passed {
                    return AssertionOutcome::pass(format!(
                        "or[{i}] passed: {}",
                        outcome.reason
                    ));
                }
                if first_failure.is_none() {
                    first_failure = Some(outcome.reason);
                }
            }
            AssertionOutcome::fail(match first_failure {
                Some(reason) => format!("no branch passed; or[0]: {reason}"),
                None => "or with no conditions".to_string(),
            })
        }
    }
}

/// Extract a single value, collapsing wildcard matches into an array
fn lookup(path: &str, root: &Value) -> Result<Value, String> {
    path::extract(path, root)
        .map(path::Extracted::into_value)
        .map_err(|e| e.to_string())
}

fn check_contains(path: &str, actual: &Value, expected: &Value) -> AssertionOutcome {
    let found = match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), needle) => items.contains(needle),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => {
            return AssertionOutcome::fail(format!(
                "'{path}': contains not applicable to {} / {}",
                kind_name(actual),
                kind_name(expected)
            ))
        }
    };

    if found {
        AssertionOutcome::pass(format!("'{path}' contains {}", preview(expected)))
    } else {
        AssertionOutcome::fail(format!(
            "'{path}': {} does not contain {}",
            preview(actual),
            preview(expected)
        ))
    }
}

fn check_order(
    path: &str,
    root: &Value,
    expected: &Value,
    op: &str,
    cmp: impl Fn(f64, f64) -> bool,
) -> AssertionOutcome {
    let actual = match lookup(path, root) {
        Ok(v) => v,
        Err(reason) => return AssertionOutcome::fail(reason),
    };

    // Ordering predicates demand numeric operands on both sides
    let (Some(lhs), Some(rhs)) = (actual.as_f64(), expected.as_f64()) else {
        let error = Error::TypeMismatch(format!(
            "{op} requires numeric operands, got {} and {} at '{path}'",
            kind_name(&actual),
            kind_name(expected)
        ));
        return AssertionOutcome::fail(format!("{}: {error}", error.code()));
    };

    if cmp(lhs, rhs) {
        AssertionOutcome::pass(format!("'{path}': {lhs} {op} {rhs}"))
    } else {
        AssertionOutcome::fail(format!("'{path}': {lhs} is not {op} {rhs}"))
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compact preview of a value for failure reasons
fn preview(value: &Value) -> String {
    let s = value.to_string();
    if s.chars().count() > 120 {
        let truncated: String = s.chars().take(120).collect();
        format!("{truncated}…")
    } else {
        s
    }
}
