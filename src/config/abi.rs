use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_META_EXPORT;
use crate::constants::DEFAULT_RECEIVE_EXPORT;
use crate::Error;
use crate::Result;

/// Names of the guest exports the host calls into
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AbiConfig {
    /// No-argument export returning the meta table pointer
    #[serde(default = "default_meta_export")]
    pub meta_export: String,

    /// No-argument export receiving one notification
    #[serde(default = "default_receive_export")]
    pub receive_export: String,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self {
            meta_export: default_meta_export(),
            receive_export: default_receive_export(),
        }
    }
}

impl AbiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.meta_export.is_empty() {
            return Err(Error::Config(ConfigError::Message("abi.meta_export must not be empty".into())));
        }
        if self.receive_export.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "abi.receive_export must not be empty".into(),
            )));
        }
        Ok(())
    }
}

fn default_meta_export() -> String {
    DEFAULT_META_EXPORT.to_string()
}

fn default_receive_export() -> String {
    DEFAULT_RECEIVE_EXPORT.to_string()
}
