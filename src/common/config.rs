//! Configuration file handling

use serde::Deserialize;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Default timings applied where a scenario leaves them out
    #[serde(default)]
    pub defaults: Defaults,

    /// Retry policy applied to actions without one of their own
    #[serde(default)]
    pub retry: RetryDefaults,
}

/// Default timing settings in seconds
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Poll interval for conditional waits that don't set one
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Bound for conditional waits that don't set one
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,

    /// Request timeout for the built-in http_call handler
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_poll_interval() -> f64 {
    2.0
}
fn default_max_wait() -> f64 {
    60.0
}
fn default_http_timeout() -> u64 {
    20
}

/// Retry defaults applied when neither the action nor the scenario
/// metadata configures a policy
#[derive(Debug, Deserialize)]
pub struct RetryDefaults {
    /// Attempts per action (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts
    #[serde(default = "default_backoff")]
    pub backoff_seconds: f64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}
fn default_backoff() -> f64 {
    1.0
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::Config(format!("failed to read '{}': {e}", path.display()))
                })?;
                return toml::from_str(&content)
                    .map_err(|e| super::Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }
}
