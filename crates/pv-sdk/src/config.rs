use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use pv_store::StorageConfig;
use pv_sync::CoordinatorConfig;

use crate::error::{SdkError, SdkResult};

/// Top-level PeerVault configuration, usually read from `peervault.toml`.
///
/// Every section is optional; missing values take their defaults.
///
/// ```toml
/// replicas = 3
///
/// [storage]
/// max_versions = 5
///
/// [coordinator]
/// settle_delay = 200      # milliseconds
/// replica_timeout = 2000
///
/// [coordinator.retry]
/// max_retries = 3
/// base_delay = 250
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerVaultConfig {
    /// Replicas in an in-process network.
    pub replicas: usize,
    pub storage: StorageConfig,
    pub coordinator: CoordinatorConfig,
}

impl Default for PeerVaultConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            storage: StorageConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl PeerVaultConfig {
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SdkError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
            .map_err(|e| SdkError::Config(format!("{}: {e}", path.display())))
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> SdkResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.replicas == 0 {
            return Err(SdkError::Config("replicas must be at least 1".into()));
        }
        self.storage
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;
        self.coordinator
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;
        Ok(())
    }
}
