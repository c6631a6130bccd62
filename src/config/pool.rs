use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Registry free-list settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    /// Released registries kept for reuse; extras are dropped
    ///
    /// **Default**: 64
    #[serde(default = "default_max_idle_registries")]
    pub max_idle_registries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_registries: default_max_idle_registries(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_idle_registries > 1_000_000 {
            return Err(Error::Config(ConfigError::Message(
                "pool.max_idle_registries must not exceed 1000000".into(),
            )));
        }
        Ok(())
    }
}

const fn default_max_idle_registries() -> usize {
    64
}
