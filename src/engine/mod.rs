//! Scenario execution engine
//!
//! The engine walks a scenario's action graph, resolves variables,
//! dispatches each action to a pluggable handler capability, evaluates
//! assertions against the results, and aggregates a verdict. Handlers
//! and wait probes are registered by name; everything else is owned
//! in-process so retry timing, cleanup guarantees, and assertion
//! ordering are fully specified and testable.

pub mod assertion;
pub mod context;
pub mod dispatch;
mod interpreter;
pub mod path;
pub mod resolver;
pub mod verdict;

#[cfg(test)]
pub(crate) mod testutil;

pub use assertion::AssertionOutcome;
pub use context::{ContextSnapshot, ExecutionContext, Providers, SystemProviders};
pub use dispatch::{ActionHandler, HandlerError, HandlerRegistry, WaitProbe};
pub use verdict::{ActionOutcome, ActionResult, RunPhase, RunStatus, Verdict};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::scenario::{RetryPolicy, Scenario};

/// Scenario execution engine
///
/// Holds the handler/probe registry, value providers, configuration, and
/// the environment namespace. One engine runs any number of scenarios;
/// each run gets its own [`ExecutionContext`] and log.
pub struct Engine {
    registry: HandlerRegistry,
    providers: Arc<dyn Providers>,
    config: Config,
    env: HashMap<String, String>,
}

impl Engine {
    /// Engine with default config and the process environment
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            registry: HandlerRegistry::default(),
            providers: Arc::new(SystemProviders),
            config,
            env: std::env::vars().collect(),
        }
    }

    /// Register an action handler capability by type name
    pub fn register_handler(
        &mut self,
        action_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        self.registry.register(action_type, handler);
    }

    /// Register a conditional-wait probe capability by name
    pub fn register_probe(&mut self, name: impl Into<String>, probe: Arc<dyn WaitProbe>) {
        self.registry.register_probe(name, probe);
    }

    /// Replace the environment namespace (defaults to the process env)
    pub fn set_env(&mut self, env: HashMap<String, String>) {
        self.env = env;
    }

    /// Replace the run-id/clock/random providers (tests pin these)
    pub fn set_providers(&mut self, providers: Arc<dyn Providers>) {
        self.providers = providers;
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub(crate) fn providers(&self) -> &Arc<dyn Providers> {
        &self.providers
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Config-file retry defaults as a policy, if they enable retries
    pub(crate) fn config_retry_policy(&self) -> Option<RetryPolicy> {
        if self.config.retry.max_attempts > 1 {
            Some(RetryPolicy {
                max_attempts: self.config.retry.max_attempts,
                backoff_seconds: self.config.retry.backoff_seconds,
                backoff: crate::scenario::BackoffMode::Fixed,
                retry_on: None,
            })
        } else {
            None
        }
    }

    /// Run a scenario to a verdict
    pub async fn run(&self, scenario: &Scenario) -> Verdict {
        self.run_with_cancel(scenario, CancellationToken::new())
            .await
    }

    /// Run a scenario under an external cancellation signal.
    ///
    /// Cancellation is observed at every suspension point and at each
    /// dispatch start; the run transitions to cleanup with a `Cancelled`
    /// outcome. `metadata.timeoutSeconds` cancels through the same path.
    pub async fn run_with_cancel(&self, scenario: &Scenario, cancel: CancellationToken) -> Verdict {
        let cancel = cancel.child_token();

        let watchdog = scenario.metadata.timeout_seconds.map(|secs| {
            let deadline_cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
                deadline_cancel.cancel();
            })
        });

        let verdict = interpreter::run_scenario(self, scenario, cancel).await;

        if let Some(handle) = watchdog {
            handle.abort();
        }
        verdict
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
