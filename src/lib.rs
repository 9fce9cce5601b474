//! Scenario runner - declarative end-to-end testing
//!
//! A scenario is a JSON/YAML document describing a sequence of atomic
//! actions (HTTP calls, key-value operations, waits) plus assertions over
//! their results; the engine executes it against live infrastructure,
//! threading data between steps, and produces a pass/fail verdict.

pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod handlers;
pub mod scenario;

// Re-export commonly used types for tests and embedding callers
pub use common::{Error, ErrorDetail, Result};
pub use engine::{
    ActionHandler, ContextSnapshot, Engine, HandlerError, Providers, RunStatus, Verdict, WaitProbe,
};
pub use scenario::{load_scenario, scenario_from_value, Scenario};
