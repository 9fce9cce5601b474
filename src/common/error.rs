//! Error types for the scenario runner
//!
//! Error messages are designed to surface in verdicts, so they carry the
//! failing action or assertion plus enough detail to act on.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scenario runner
#[derive(Error, Debug)]
pub enum Error {
    // === Scenario Loading Errors ===
    #[error("Failed to read scenario '{path}': {error}")]
    ScenarioRead { path: String, error: String },

    #[error("Failed to parse scenario: {0}")]
    ScenarioParse(String),

    #[error("Duplicate action name '{0}' in scenario")]
    DuplicateActionName(String),

    #[error("passToContext key '{0}' collides with a reserved namespace (env, testRunId, now, random)")]
    ReservedContextName(String),

    // === Variable Resolution Errors ===
    #[error("Unresolved variable '{{{{{0}}}}}'")]
    UnresolvedVariable(String),

    // === Path Extraction Errors ===
    #[error("Path '{0}' not found in value")]
    PathNotFound(String),

    #[error("Invalid path expression '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    // === Assertion Errors ===
    #[error("{0}")]
    TypeMismatch(String),

    // === Dispatch Errors ===
    #[error("Unknown action type '{0}'. No handler is registered for it")]
    UnknownActionType(String),

    #[error("Handler for action '{action}' failed: {message}")]
    HandlerFailure {
        action: String,
        message: String,
        status_code: Option<u16>,
    },

    // === Control-Flow Errors ===
    #[error("Loop '{action}' exceeded max_iterations ({max_iterations}) with its condition still true")]
    LoopBoundExceeded { action: String, max_iterations: u32 },

    #[error("Wait '{action}' timed out after {max_wait_seconds} seconds")]
    WaitTimeout { action: String, max_wait_seconds: f64 },

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this error, used in result logs
    /// and verdict causes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ScenarioRead { .. } => "SCENARIO_READ",
            Error::ScenarioParse(_) => "SCENARIO_PARSE",
            Error::DuplicateActionName(_) => "DUPLICATE_ACTION_NAME",
            Error::ReservedContextName(_) => "RESERVED_CONTEXT_NAME",
            Error::UnresolvedVariable(_) => "UNRESOLVED_VARIABLE",
            Error::PathNotFound(_) => "PATH_NOT_FOUND",
            Error::InvalidPath { .. } => "INVALID_PATH",
            Error::TypeMismatch(_) => "TYPE_MISMATCH",
            Error::UnknownActionType(_) => "UNKNOWN_ACTION_TYPE",
            Error::HandlerFailure { .. } => "HANDLER_FAILURE",
            Error::LoopBoundExceeded { .. } => "LOOP_BOUND_EXCEEDED",
            Error::WaitTimeout { .. } => "WAIT_TIMEOUT",
            Error::Cancelled(_) => "CANCELLED",
            Error::Config(_) => "CONFIG",
            Error::ConfigParse(_) => "CONFIG_PARSE",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Create a handler failure for an action
    pub fn handler_failure(action: &str, message: &str, status_code: Option<u16>) -> Self {
        Self::HandlerFailure {
            action: action.to_string(),
            message: message.to_string(),
            status_code,
        }
    }
}

/// Serializable error detail attached to action results and verdicts
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorDetail {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.code().to_string(),
            message: e.to_string(),
        }
    }
}
