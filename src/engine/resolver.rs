//! Variable resolver
//!
//! Substitutes `{{…}}` placeholder expressions inside action parameters.
//! Only string-typed fields are scanned. Expression forms, in precedence
//! order: built-ins (`testRunId`, `now`, `now + <seconds>`, `random`),
//! then `env.<name>`, then `context.<name>`. Unresolvable expressions are
//! fatal to the owning action, which never dispatches.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::common::{Error, Result};

use super::context::ExecutionContext;

/// Per-dispatch resolution scope
///
/// `now` and `random` are snapshotted here so every placeholder within
/// one action dispatch sees the same values, while separate dispatches
/// see fresh ones.
pub struct ResolveScope<'a> {
    ctx: &'a ExecutionContext,
    now: DateTime<Utc>,
    random: String,
}

impl<'a> ResolveScope<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self {
            ctx,
            now: ctx.providers().now(),
            random: ctx.providers().random(),
        }
    }
}

/// Resolve every placeholder in a parameter value
///
/// Returns an equivalent structure; the input is not mutated.
pub fn resolve_params(value: &Value, scope: &ResolveScope) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(s, scope),
        Value::Array(items) => {
            let resolved: Result<Vec<Value>> =
                items.iter().map(|v| resolve_params(v, scope)).collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, v) in map {
                resolved.insert(key.clone(), resolve_params(v, scope)?);
            }
            Ok(Value::Object(resolved))
        }
        // Non-string fields are not scanned
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, scope: &ResolveScope) -> Result<Value> {
    // A string that is exactly one placeholder resolves to the referenced
    // value with its type preserved, so extracted values round-trip.
    if s.starts_with("{{") && s.ends_with("}}") && s.len() >= 4 {
        let inner = &s[2..s.len() - 2];
        if !inner.contains("{{") && !inner.contains("}}") {
            return evaluate(inner.trim(), scope);
        }
    }

    // Otherwise interpolate each placeholder textually.
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let value = evaluate(after[..end].trim(), scope)?;
                out.push_str(&value_to_text(&value));
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated braces are literal text
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// Evaluate one placeholder expression
fn evaluate(expr: &str, scope: &ResolveScope) -> Result<Value> {
    match expr {
        "testRunId" => return Ok(Value::String(scope.ctx.run_id().to_string())),
        "now" => return Ok(Value::String(format_instant(scope.now))),
        "random" => return Ok(Value::String(scope.random.clone())),
        _ => {}
    }

    if let Some(offset) = expr.strip_prefix("now") {
        let offset = offset.trim();
        if let Some(seconds) = offset.strip_prefix('+') {
            let seconds: i64 = seconds.trim().parse().map_err(|_| {
                Error::UnresolvedVariable(expr.to_string())
            })?;
            return Ok(Value::String(format_instant(
                scope.now + Duration::seconds(seconds),
            )));
        }
        if !offset.is_empty() {
            return Err(Error::UnresolvedVariable(expr.to_string()));
        }
    }

    if let Some(name) = expr.strip_prefix("env.") {
        return scope
            .ctx
            .env_var(name)
            .map(Value::String)
            .ok_or_else(|| Error::UnresolvedVariable(expr.to_string()));
    }

    if let Some(name) = expr.strip_prefix("context.") {
        return scope
            .ctx
            .get(name)
            .ok_or_else(|| Error::UnresolvedVariable(expr.to_string()));
    }

    Err(Error::UnresolvedVariable(expr.to_string()))
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Textual form of a value interpolated into a longer string
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Structures interpolate as compact JSON
        other => other.to_string(),
    }
}
