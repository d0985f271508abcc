//! Sync session configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Diff broadcasts per second
    pub sync_rate: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { sync_rate: 10.0 }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sync_rate.is_finite() && self.sync_rate > 0.0) {
            return Err(SyncError::Config(format!("sync rate must be positive, got {}", self.sync_rate)));
        }
        Ok(())
    }

    /// Seconds between diff broadcasts.
    pub fn interval(&self) -> f32 {
        1.0 / self.sync_rate
    }
}
