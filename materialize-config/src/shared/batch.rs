use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default number of keys sent per multi-get or staged per round trip.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

/// Batching of keys during the Load phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoadBatchConfig {
    /// Maximum number of keys accumulated for one binding before a flush.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_max_size() -> usize {
    DEFAULT_LOAD_BATCH_SIZE
}

impl LoadBatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::NotPositive("max_size"));
        }

        Ok(())
    }
}

impl Default for LoadBatchConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }
}
