//! Shared fixtures for engine unit tests

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::context::{ExecutionContext, Providers};

/// Deterministic providers so resolved values are assertable
pub(crate) struct FixedProviders {
    pub run_id: String,
    pub now: DateTime<Utc>,
    pub random: String,
}

impl Providers for FixedProviders {
    fn run_id(&self) -> String {
        self.run_id.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn random(&self) -> String {
        self.random.clone()
    }
}

/// A context with a pinned run id, clock, and one env var
pub(crate) fn fixed_context() -> ExecutionContext {
    let providers = FixedProviders {
        run_id: "run-1".into(),
        now: "2024-05-01T12:00:00Z".parse().unwrap(),
        random: "abc123".into(),
    };
    let mut env = HashMap::new();
    env.insert(
        "API_BASE".to_string(),
        "https://api.example.com".to_string(),
    );
    ExecutionContext::new(env, Arc::new(providers))
}
