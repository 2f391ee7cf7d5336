//! Engine configuration.
//!
//! Values are layered from built-in defaults and `GRIDDLE_`-prefixed
//! environment variables, e.g. `GRIDDLE_PIPELINE_PARALLEL_SIZE=2`.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{EngineError, Result};

/// Prefix for environment overrides
const ENV_PREFIX: &str = "GRIDDLE_";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of pipeline stages, one virtual engine loop per stage
    #[validate(range(min = 1))]
    pub pipeline_parallel_size: usize,

    /// Upper bound on how long an idle loop sleeps before re-checking for work
    #[validate(range(min = 1))]
    pub idle_wait_ms: u64,

    /// Maximum duration of a single executor step
    pub iteration_timeout_secs: Option<u64>,

    /// Start the background loop on the first request if it is not running
    pub start_engine_loop: bool,

    /// Log request admission and aborts
    pub log_requests: bool,

    /// Deprecated: run the engine itself as a remote actor.
    /// Refused at startup unless `allow_remote_engine` is also set.
    pub remote_engine: bool,

    /// Explicit opt-in for `remote_engine`
    pub allow_remote_engine: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipeline_parallel_size: 1,
            idle_wait_ms: 100,
            iteration_timeout_secs: Some(60),
            start_engine_loop: true,
            log_requests: true,
            remote_engine: false,
            allow_remote_engine: false,
        }
    }
}

impl EngineConfig {
    pub(crate) fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the configuration from defaults and the environment, then validate it.
    pub fn from_settings() -> Result<Self> {
        let config: EngineConfig = Self::figment()
            .extract()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        config
            .validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        Ok(config)
    }

    pub fn with_pipeline_parallel_size(mut self, size: usize) -> Self {
        self.pipeline_parallel_size = size;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = wait.as_millis().max(1) as u64;
        self
    }

    pub fn with_iteration_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.iteration_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    pub fn with_start_engine_loop(mut self, start: bool) -> Self {
        self.start_engine_loop = start;
        self
    }

    pub fn with_log_requests(mut self, log: bool) -> Self {
        self.log_requests = log;
        self
    }

    pub fn with_remote_engine(mut self, remote: bool, allow: bool) -> Self {
        self.remote_engine = remote;
        self.allow_remote_engine = allow;
        self
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn iteration_timeout(&self) -> Option<Duration> {
        self.iteration_timeout_secs.map(Duration::from_secs)
    }

    /// Checks that must pass before any virtual engine loop is spawned.
    pub fn validate_launch(&self) -> Result<()> {
        self.validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        if self.remote_engine && !self.allow_remote_engine {
            return Err(EngineError::Configuration(format!(
                "remote_engine is deprecated; set {ENV_PREFIX}ALLOW_REMOTE_ENGINE=true to use it anyway"
            )));
        }
        Ok(())
    }
}
