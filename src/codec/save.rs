//! Full-chunk save records.

use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::math::IntBox;
use crate::voxel::chunk::{local_position, Chunk, ChunkId, CHUNK_SIZE, CHUNK_VOXELS};
use crate::voxel::material::VoxelMaterial;
use crate::voxel::store::VoxelStore;

/// Dense contents of one edited chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkSave {
    pub id: ChunkId,
    /// Minimum corner of the chunk
    pub position: IVec3,
    /// Depth of the world the chunk was saved from
    pub depth: u8,
    pub values: Vec<f32>,
    pub materials: Vec<VoxelMaterial>,
}

/// Every edited chunk of a world, sorted by increasing id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSave {
    pub depth: u8,
    pub chunks: Vec<ChunkSave>,
}

impl WorldSave {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Check the save can be loaded into a world of `depth` as a whole.
    pub fn validate(&self, depth: u8) -> Result<()> {
        if self.depth != depth {
            return Err(Error::DepthMismatch { expected: depth, found: self.depth });
        }

        let mut previous: Option<ChunkId> = None;
        for chunk in &self.chunks {
            if chunk.depth != depth {
                return Err(Error::DepthMismatch { expected: depth, found: chunk.depth });
            }
            if chunk.values.len() != CHUNK_VOXELS || chunk.materials.len() != CHUNK_VOXELS {
                return Err(Error::CorruptSave(format!(
                    "chunk {} has {} values and {} materials",
                    chunk.id,
                    chunk.values.len(),
                    chunk.materials.len()
                )));
            }
            if chunk.id.leaf_origin(depth) != Some(chunk.position) {
                return Err(Error::CorruptSave(format!(
                    "chunk {} does not sit at {}",
                    chunk.id, chunk.position
                )));
            }
            if previous.is_some_and(|p| p >= chunk.id) {
                return Err(Error::CorruptSave(format!("chunk {} is out of order", chunk.id)));
            }
            previous = Some(chunk.id);
        }
        Ok(())
    }
}

impl VoxelStore {
    /// Snapshot every dirty chunk, sorted by increasing id.
    ///
    /// Chunks are locked one at a time, shared. Runs on the store's worker
    /// pool when one is attached.
    pub fn collect_dirty_chunks_for_save(&self) -> WorldSave {
        let dirty: Vec<Arc<Chunk>> = self.leaves().into_iter().filter(|c| c.is_dirty()).collect();
        let chunks: Vec<ChunkSave> = match self.pool() {
            Some(pool) => pool.install(|| dirty.par_iter().filter_map(|c| self.snapshot_chunk(c)).collect()),
            None => dirty.iter().filter_map(|c| self.snapshot_chunk(c)).collect(),
        };
        debug!("Collected {} dirty chunks for save", chunks.len());
        WorldSave { depth: self.depth(), chunks }
    }

    fn snapshot_chunk(&self, chunk: &Chunk) -> Option<ChunkSave> {
        let transaction = self.begin_get(chunk.bounds());
        transaction
            .with_chunk(chunk.id(), |data| {
                data.dense().map(|dense| ChunkSave {
                    id: chunk.id(),
                    position: data.origin(),
                    depth: self.depth(),
                    values: dense.values.to_vec(),
                    materials: dense.materials.to_vec(),
                })
            })
            .flatten()
    }

    /// Load a save, replacing the contents of every chunk it names.
    ///
    /// Records are applied in decreasing id order. With `reset`, dirty chunks
    /// the save does not mention go back to the generator. Returns every
    /// position whose value or material changed. A save recorded at another
    /// depth, or one that fails validation, is rejected before anything is
    /// touched.
    pub fn load_from_save(&self, save: &WorldSave, reset: bool) -> Result<Vec<IVec3>> {
        if let Err(e) = save.validate(self.depth()) {
            warn!("Rejecting save: {}", e);
            return Err(e);
        }

        let mut modified = Vec::new();
        let mut queue: Vec<&ChunkSave> = save.chunks.iter().collect();
        while let Some(record) = queue.pop() {
            let region = IntBox::from_min_size(record.position, IVec3::splat(CHUNK_SIZE));
            let mut transaction = self.begin_set(region);
            let changed = transaction
                .with_chunk_mut(record.id, |data, generator| {
                    data.load_arrays(&record.values, &record.materials, generator)
                })
                .unwrap_or_default();
            modified.extend(changed.into_iter().map(|i| record.position + local_position(i)));
        }

        if reset {
            for chunk in self.leaves() {
                if !chunk.is_dirty() || save.chunks.binary_search_by_key(&chunk.id(), |c| c.id).is_ok() {
                    continue;
                }
                let mut transaction = self.begin_set(chunk.bounds());
                let changed = transaction
                    .with_chunk_mut(chunk.id(), |data, generator| data.reset(generator))
                    .unwrap_or_default();
                modified.extend(changed.into_iter().map(|i| chunk.origin() + local_position(i)));
            }
        }

        debug!("Loaded {} chunks, {} voxels modified", save.chunks.len(), modified.len());
        Ok(modified)
    }
}
