use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Replica storage configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum revisions retained per record triple.
    pub max_versions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { max_versions: 5 }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_versions == 0 {
            return Err(StoreError::InvalidConfig(
                "max_versions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
