//! Configuration management for the range watch host module.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`RANGE_WATCH__` prefix)
//! - Component-wise validation
mod abi;
mod pool;
mod watch;
pub use abi::*;
pub use pool::*;
pub use watch::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Top-level configuration for the host module
///
/// Sources are merged in order (later overrides earlier):
/// 1. Default values from code
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RangeWatchConfig {
    /// Per-watch queueing and delivery parameters
    #[serde(default)]
    pub watch: WatchConfig,
    /// Guest export names
    #[serde(default)]
    pub abi: AbiConfig,
    /// Registry recycling
    #[serde(default)]
    pub pool: PoolConfig,
}

impl RangeWatchConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("RANGE_WATCH__WATCH__QUEUE_CAPACITY", "64");
    /// let cfg = RangeWatchConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every subsystem and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.watch.validate()?;
        self.abi.validate()?;
        self.pool.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix("RANGE_WATCH")
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}
