//! Execution context and value providers
//!
//! The context is the only state shared between actions within one run:
//! a mutex-guarded variable map fed by `passToContext`, the run identity,
//! and the read-only environment namespace. Parallel branches work on
//! forks whose writes are merged back in declaration order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Supplies `testRunId`, `now`, and `random` values to the resolver.
///
/// The default implementation uses the system clock and uuid v4; tests
/// substitute deterministic values.
pub trait Providers: Send + Sync {
    fn run_id(&self) -> String;
    fn now(&self) -> DateTime<Utc>;
    fn random(&self) -> String;
}

/// System clock + uuid-backed providers
pub struct SystemProviders;

impl Providers for SystemProviders {
    fn run_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn random(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Mutable state threading data between actions within one run
pub struct ExecutionContext {
    run_id: String,
    env: Arc<HashMap<String, String>>,
    providers: Arc<dyn Providers>,
    vars: Mutex<HashMap<String, Value>>,
    /// Writes recorded since the fork; empty on the root context
    delta: Mutex<Vec<(String, Value)>>,
}

impl ExecutionContext {
    /// Create the root context for one run
    pub fn new(env: HashMap<String, String>, providers: Arc<dyn Providers>) -> Self {
        let run_id = providers.run_id();
        Self {
            run_id,
            env: Arc::new(env),
            providers,
            vars: Mutex::new(HashMap::new()),
            delta: Mutex::new(Vec::new()),
        }
    }

    /// Run-scoped identifier exposed as `{{testRunId}}`
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn providers(&self) -> &Arc<dyn Providers> {
        &self.providers
    }

    /// Read-only environment namespace (`{{env.NAME}}`)
    pub fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    /// Current value of a context variable (`{{context.name}}`)
    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.lock().get(name).cloned()
    }

    /// Write a context variable, overwriting any prior value
    pub fn set(&self, name: &str, value: Value) {
        self.vars.lock().insert(name.to_string(), value.clone());
        self.delta.lock().push((name.to_string(), value));
    }

    /// Fork for a parallel branch: reads see the state at the fork point,
    /// writes stay local until merged
    pub fn fork(&self) -> Self {
        Self {
            run_id: self.run_id.clone(),
            env: Arc::clone(&self.env),
            providers: Arc::clone(&self.providers),
            vars: Mutex::new(self.vars.lock().clone()),
            delta: Mutex::new(Vec::new()),
        }
    }

    /// Drain the writes recorded since the fork
    pub fn take_delta(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.delta.lock())
    }

    /// Apply a branch's writes in their recorded order
    pub fn merge(&self, delta: Vec<(String, Value)>) {
        let mut vars = self.vars.lock();
        let mut own = self.delta.lock();
        for (name, value) in delta {
            vars.insert(name.clone(), value.clone());
            own.push((name, value));
        }
    }

    /// Context variables as a JSON object, for assertion roots
    pub fn vars_as_json(&self) -> Value {
        let vars = self.vars.lock();
        let mut map = Map::new();
        for (k, v) in vars.iter() {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    /// Immutable view handed to handler capabilities
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            test_run_id: self.run_id.clone(),
            env: (*self.env).clone(),
            vars: self.vars.lock().clone(),
        }
    }
}

/// Point-in-time view of the context passed to handlers and probes
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub test_run_id: String,
    pub env: HashMap<String, String>,
    pub vars: HashMap<String, Value>,
}
