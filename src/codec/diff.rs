//! Sparse per-voxel diffs for network sync.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::math::IntBox;
use crate::voxel::chunk::{local_position, ChunkId, CHUNK_SIZE, CHUNK_VOXELS};
use crate::voxel::material::VoxelMaterial;
use crate::voxel::store::VoxelStore;

/// New value of one voxel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueDiff {
    pub chunk_id: ChunkId,
    /// Dense index inside the chunk
    pub index: u32,
    pub value: f32,
}

/// New material of one voxel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialDiff {
    pub chunk_id: ChunkId,
    pub index: u32,
    pub material: VoxelMaterial,
}

/// Value and material diffs, each sorted by increasing chunk id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffQueues {
    pub values: Vec<ValueDiff>,
    pub materials: Vec<MaterialDiff>,
}

impl DiffQueues {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.materials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.materials.len()
    }

    /// Reject queues with out-of-range indices, ids that do not name a
    /// leaf, or ids out of order.
    pub fn validate(&self, depth: u8) -> Result<()> {
        check_queue(self.values.iter().map(|d| (d.chunk_id, d.index)), depth, "value")?;
        check_queue(self.materials.iter().map(|d| (d.chunk_id, d.index)), depth, "material")
    }
}

fn check_queue(entries: impl Iterator<Item = (ChunkId, u32)>, depth: u8, kind: &str) -> Result<()> {
    let mut previous: Option<ChunkId> = None;
    for (id, index) in entries {
        if index as usize >= CHUNK_VOXELS {
            return Err(Error::CorruptDiff(format!("{kind} diff index {index} in chunk {id} is out of range")));
        }
        if id.leaf_origin(depth).is_none() {
            return Err(Error::CorruptDiff(format!("{kind} diff names {id}, which is not a chunk")));
        }
        if previous.is_some_and(|p| p > id) {
            return Err(Error::CorruptDiff(format!("{kind} diff queue is not sorted at {id}")));
        }
        previous = Some(id);
    }
    Ok(())
}

impl VoxelStore {
    /// Drain every voxel changed since the last call.
    ///
    /// Only multiplayer stores track network dirtiness; other stores return
    /// empty queues.
    pub fn collect_diff_queues(&self) -> DiffQueues {
        let mut queues = DiffQueues::default();
        if !self.is_multiplayer() {
            debug!("Diff queues requested from a store without multiplayer tracking");
            return queues;
        }

        for chunk in self.leaves() {
            if !chunk.is_dirty() {
                continue;
            }
            let id = chunk.id();
            let mut transaction = self.begin_set(chunk.bounds());
            let Some((values, materials)) = transaction.with_chunk_mut(id, |data, _| data.take_network_diffs())
            else {
                continue;
            };
            queues.values.extend(values.into_iter().map(|(index, value)| ValueDiff { chunk_id: id, index, value }));
            queues
                .materials
                .extend(materials.into_iter().map(|(index, material)| MaterialDiff { chunk_id: id, index, material }));
        }
        debug!("Collected {} value and {} material diffs", queues.values.len(), queues.materials.len());
        queues
    }

    /// Apply diffs received from a peer. Applying the same queues twice is
    /// the same as applying them once. Returns the positions that changed.
    ///
    /// Invalid queues are rejected before anything is written.
    pub fn load_diff_queues(&self, diffs: &DiffQueues) -> Result<Vec<IVec3>> {
        if let Err(e) = diffs.validate(self.depth()) {
            warn!("Rejecting diff queues: {}", e);
            return Err(e);
        }

        let mut by_chunk: BTreeMap<ChunkId, (Vec<&ValueDiff>, Vec<&MaterialDiff>)> = BTreeMap::new();
        for diff in &diffs.values {
            by_chunk.entry(diff.chunk_id).or_default().0.push(diff);
        }
        for diff in &diffs.materials {
            by_chunk.entry(diff.chunk_id).or_default().1.push(diff);
        }

        let mut modified = Vec::new();
        for (id, (values, materials)) in by_chunk {
            let Some(origin) = id.leaf_origin(self.depth()) else {
                continue;
            };
            let mut transaction = self.begin_set(IntBox::from_min_size(origin, IVec3::splat(CHUNK_SIZE)));
            let mut changed = transaction
                .with_chunk_mut(id, |data, generator| {
                    let mut changed = Vec::new();
                    for diff in values {
                        if data.write(diff.index as usize, Some(diff.value), None, generator, false) {
                            changed.push(diff.index as usize);
                        }
                    }
                    for diff in materials {
                        if data.write(diff.index as usize, None, Some(diff.material), generator, false) {
                            changed.push(diff.index as usize);
                        }
                    }
                    changed
                })
                .unwrap_or_default();
            changed.sort_unstable();
            changed.dedup();
            modified.extend(changed.into_iter().map(|i| origin + local_position(i)));
        }
        Ok(modified)
    }
}
