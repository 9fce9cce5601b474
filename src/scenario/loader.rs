//! Scenario loading and validation
//!
//! Loads a scenario from a JSON or YAML file (by extension) and enforces
//! the declaration-level invariants: action names are unique and
//! `passToContext` keys stay out of the reserved namespaces.

use std::collections::HashSet;
use std::path::Path;

use crate::common::{Error, Result};

use super::model::{Action, ActionKind, Scenario, RESERVED_CONTEXT_NAMES};

/// Load a scenario from a file, validating invariants
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::ScenarioRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let scenario: Scenario = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| Error::ScenarioParse(e.to_string()))?
    } else {
        serde_json::from_str(&content).map_err(|e| Error::ScenarioParse(e.to_string()))?
    };

    validate(&scenario)?;
    Ok(scenario)
}

/// Parse a scenario from an in-memory JSON value, validating invariants
pub fn scenario_from_value(value: serde_json::Value) -> Result<Scenario> {
    let scenario: Scenario =
        serde_json::from_value(value).map_err(|e| Error::ScenarioParse(e.to_string()))?;
    validate(&scenario)?;
    Ok(scenario)
}

/// Check declaration-level invariants
pub fn validate(scenario: &Scenario) -> Result<()> {
    let mut seen = HashSet::new();
    for action in scenario
        .setup
        .iter()
        .chain(&scenario.actions)
        .chain(&scenario.cleanup)
    {
        check_action(action, &mut seen)?;
    }
    Ok(())
}

fn check_action(action: &Action, seen: &mut HashSet<String>) -> Result<()> {
    if !seen.insert(action.name.clone()) {
        return Err(Error::DuplicateActionName(action.name.clone()));
    }

    if let Some(mapping) = &action.pass_to_context {
        for key in mapping.keys() {
            if RESERVED_CONTEXT_NAMES.contains(&key.as_str()) {
                return Err(Error::ReservedContextName(key.clone()));
            }
        }
    }

    if let Some(fallback) = &action.on_failure {
        check_action(fallback, seen)?;
    }

    match &action.kind {
        ActionKind::Parallel { branches } => {
            for branch in branches {
                for inner in branch {
                    check_action(inner, seen)?;
                }
            }
        }
        ActionKind::Choice {
            if_true, if_false, ..
        } => {
            for inner in if_true.iter().chain(if_false) {
                check_action(inner, seen)?;
            }
        }
        ActionKind::Loop { actions, .. } => {
            for inner in actions {
                check_action(inner, seen)?;
            }
        }
        ActionKind::Invoke { .. } | ActionKind::Wait(_) => {}
    }

    Ok(())
}
