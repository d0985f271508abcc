//! Store configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::voxel::octree::MAX_DEPTH;

/// Configuration for a [`VoxelStore`](crate::voxel::VoxelStore).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Octree depth. The world spans `CHUNK_SIZE * 2^depth` voxels per axis,
    /// centered on the origin.
    pub depth: u8,
    /// Track per-voxel network dirty bits for diff queues.
    pub multiplayer: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            depth: 6,
            multiplayer: false,
        }
    }
}

impl StoreConfig {
    /// Create a config with the given depth and multiplayer off.
    pub fn new(depth: u8) -> Self {
        Self { depth, ..Default::default() }
    }

    /// Enable or disable network dirty tracking.
    pub fn with_multiplayer(mut self, multiplayer: bool) -> Self {
        self.multiplayer = multiplayer;
        self
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.depth > MAX_DEPTH {
            return Err(Error::Config(format!(
                "depth {} exceeds maximum of {}",
                self.depth, MAX_DEPTH
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
