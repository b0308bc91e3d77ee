//! Client configuration.
//!
//! Defaults match a stock Celery deployment on Redis. `from_env` overlays
//! `COURIER_*` variables on top of the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::PartialTaskOptions;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
pub const DEFAULT_QUEUE: &str = "celery";
/// Fixed by the worker's Redis result backend.
pub const DEFAULT_RESULT_KEY_PREFIX: &str = "celery-task-meta-";
pub const DEFAULT_SCHEDULED_HASH: &str = "unacked";
pub const DEFAULT_SCHEDULED_INDEX: &str = "unacked_index";
pub const DEFAULT_RESULT_WAIT_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("result wait timeout must be greater than zero")]
    ZeroWaitTimeout,

    #[error("invalid value for {var}: {message}")]
    InvalidEnv { var: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub redis_url: String,
    /// Queue used when a submission names none.
    pub default_queue: String,
    pub result_key_prefix: String,
    /// Hash of delayed/unacknowledged messages, maintained by the worker side.
    pub scheduled_hash: String,
    /// Sorted index over `scheduled_hash`.
    pub scheduled_index: String,
    pub result_wait_timeout_ms: u64,
    /// Merged under every submission's own options.
    pub default_options: PartialTaskOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            default_queue: DEFAULT_QUEUE.to_string(),
            result_key_prefix: DEFAULT_RESULT_KEY_PREFIX.to_string(),
            scheduled_hash: DEFAULT_SCHEDULED_HASH.to_string(),
            scheduled_index: DEFAULT_SCHEDULED_INDEX.to_string(),
            result_wait_timeout_ms: DEFAULT_RESULT_WAIT_TIMEOUT_MS,
            default_options: PartialTaskOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn result_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.result_wait_timeout_ms)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for:
    ///
    /// - `COURIER_REDIS_URL`
    /// - `COURIER_DEFAULT_QUEUE`
    /// - `COURIER_RESULT_KEY_PREFIX`
    /// - `COURIER_RESULT_WAIT_TIMEOUT_MS`
    /// - `COURIER_DEFAULT_OPTIONS` (JSON object of task options)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("COURIER_REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(queue) = lookup("COURIER_DEFAULT_QUEUE") {
            config.default_queue = queue;
        }
        if let Some(prefix) = lookup("COURIER_RESULT_KEY_PREFIX") {
            config.result_key_prefix = prefix;
        }
        if let Some(timeout) = lookup("COURIER_RESULT_WAIT_TIMEOUT_MS") {
            config.result_wait_timeout_ms =
                timeout.trim().parse().map_err(|e| ConfigError::InvalidEnv {
                    var: "COURIER_RESULT_WAIT_TIMEOUT_MS",
                    message: format!("{e}"),
                })?;
        }
        if let Some(options) = lookup("COURIER_DEFAULT_OPTIONS") {
            config.default_options =
                serde_json::from_str(&options).map_err(|e| ConfigError::InvalidEnv {
                    var: "COURIER_DEFAULT_OPTIONS",
                    message: format!("{e}"),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::Empty("redis_url"));
        }
        if self.default_queue.is_empty() {
            return Err(ConfigError::Empty("default_queue"));
        }
        if self.result_key_prefix.is_empty() {
            return Err(ConfigError::Empty("result_key_prefix"));
        }
        if self.scheduled_hash.is_empty() {
            return Err(ConfigError::Empty("scheduled_hash"));
        }
        if self.scheduled_index.is_empty() {
            return Err(ConfigError::Empty("scheduled_index"));
        }
        if self.result_wait_timeout_ms == 0 {
            return Err(ConfigError::ZeroWaitTimeout);
        }
        Ok(())
    }
}
