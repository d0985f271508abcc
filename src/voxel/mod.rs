//! Voxel data structures and operations

pub mod asset;
pub mod chunk;
pub mod generator;
pub mod material;
pub mod octree;
pub mod query;
pub mod store;
pub mod tools;
pub mod transaction;

pub use asset::{AssetInstance, AssetMode};
pub use chunk::{ChunkId, CHUNK_SIZE, CHUNK_VOXELS};
pub use generator::{
    FlatGenerator, NoiseTerrainGenerator, SphereGenerator, SphereSwapGenerator, TerrainParams,
    WorldGenerator,
};
pub use material::{MaterialLayer, VoxelMaterial};
pub use octree::{DiscardAction, StoreStats, MAX_DEPTH};
pub use query::SurfaceHit;
pub use store::VoxelStore;
pub use transaction::{GetTransaction, LockListener, LockMode, SetTransaction};
