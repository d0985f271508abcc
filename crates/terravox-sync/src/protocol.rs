//! Sync protocol - JSON message definitions

use serde::{Deserialize, Serialize};
use terravox::{DiffQueues, WorldSave};

use crate::error::Result;

/// Messages sent from the server to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum SyncMessage {
    /// Every edited chunk; sent once when a client connects
    FullSave(WorldSave),
    /// Voxels changed since the previous broadcast
    Diffs(DiffQueues),
}

impl SyncMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
