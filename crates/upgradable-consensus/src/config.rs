// UPGRADE CONFIGURATION
// Fork schedule and batch-verification settings, loaded with the `config` crate

use crate::fork::ForkPredicate;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variables with this prefix override file values,
/// e.g. `UPGRADABLE__SYSTEM_CONTRACT_TIME=1700000000`.
pub const ENV_PREFIX: &str = "UPGRADABLE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load upgrade config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("verify_buffer must be > 0")]
    ZeroVerifyBuffer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Timestamp from which blocks are governed by the SystemContract engine.
    /// `None` keeps the chain on Clique.
    #[serde(default)]
    pub system_contract_time: Option<u64>,

    /// Capacity of the result stream used for batches that cross the fork.
    /// Defaults to the batch length.
    #[serde(default)]
    pub verify_buffer: Option<usize>,
}

impl UpgradeConfig {
    /// Load from a file (format inferred from the extension), then apply
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?;
        Self::validated(settings.try_deserialize()?)
    }

    /// Parse inline TOML.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        Self::validated(settings.try_deserialize()?)
    }

    fn validated(config: UpgradeConfig) -> Result<Self, ConfigError> {
        if config.verify_buffer == Some(0) {
            return Err(ConfigError::ZeroVerifyBuffer);
        }
        Ok(config)
    }

    pub fn fork_predicate(&self) -> ForkPredicate {
        match self.system_contract_time {
            Some(activation) => ForkPredicate::at_timestamp(activation),
            None => ForkPredicate::never(),
        }
    }
}
