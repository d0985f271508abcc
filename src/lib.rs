//! Terravox - hierarchical voxel data store
//!
//! A sparse octree of fixed-size chunks that lazily materializes generator
//! output, tracks edits for save/load and network diffing, and hands out
//! lock-ordered read/write transactions to many worker threads.

pub mod core;
pub mod math;
pub mod voxel;
pub mod codec;

pub use crate::core::{Error, Result, StoreConfig};
pub use crate::math::IntBox;
pub use crate::voxel::{
    AssetInstance, AssetMode, ChunkId, DiscardAction, GetTransaction, LockListener, LockMode,
    SetTransaction, VoxelMaterial, VoxelStore, WorldGenerator, CHUNK_SIZE, CHUNK_VOXELS,
};
pub use crate::codec::{ChunkSave, DiffQueues, MaterialDiff, ValueDiff, WorldSave};
