//! Pool configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (PARALLEL_POOL_RUNTIME, PARALLEL_POOL_WORKERS)
//! 3. Config file (TOML)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use parallel_pool::util::config::{PoolConfig, RuntimeKind};
//!
//! let config = PoolConfig::from_toml_str("runtime = \"worker-pool\"\nworkers = 2").unwrap();
//! assert_eq!(config.runtime, RuntimeKind::WorkerPool);
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::RuntimeConfig;

/// Environment variable selecting the runtime.
pub const ENV_RUNTIME: &str = "PARALLEL_POOL_RUNTIME";

/// Environment variable setting the worker count.
pub const ENV_WORKERS: &str = "PARALLEL_POOL_WORKERS";

/// Which runtime backs a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// One thread per task.
    #[default]
    Thread,
    /// Fixed set of worker threads.
    WorkerPool,
}

impl FromStr for RuntimeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thread" => Ok(RuntimeKind::Thread),
            "worker-pool" | "worker_pool" => Ok(RuntimeKind::WorkerPool),
            other => Err(ConfigError::InvalidValue {
                key: "runtime",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            RuntimeKind::Thread => f.write_str("thread"),
            RuntimeKind::WorkerPool => f.write_str("worker-pool"),
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Runtime backing the pool
    #[serde(default)]
    pub runtime: RuntimeKind,
    /// Worker count for the worker-pool runtime
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Prefix for spawned thread names
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Stack size of spawned threads in bytes
    #[serde(default)]
    pub stack_size: Option<usize>,
}

fn default_workers() -> usize {
    RuntimeConfig::default().num_workers
}

fn default_thread_name_prefix() -> String {
    "pool-worker".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            workers: default_workers(),
            thread_name_prefix: default_thread_name_prefix(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup.
    pub fn apply_env_from<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(runtime) = lookup(ENV_RUNTIME) {
            self.runtime = runtime.trim().parse()?;
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "workers",
                    value: workers.clone(),
                })?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers",
                value: "0".to_string(),
            });
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "stack_size",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Runtime settings derived from this config.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            num_workers: self.workers,
            thread_name_prefix: self.thread_name_prefix.clone(),
            stack_size: self.stack_size,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for `{key}`: {value}")]
    InvalidValue { key: &'static str, value: String },
}
