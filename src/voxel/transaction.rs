//! Get/Set transactions: scoped, lock-ordered access to a region.
//!
//! A transaction holds the main lock of every chunk intersecting its region.
//! Locks are taken in increasing chunk-id order and released in decreasing
//! order, so overlapping transactions can never wait on each other in a
//! cycle.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::RawRwLock;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};

use crate::core::types::IVec3;
use crate::math::IntBox;
use crate::voxel::asset::AssetInstance;
use crate::voxel::chunk::{local_index, Chunk, ChunkData, ChunkId};
use crate::voxel::generator::WorldGenerator;
use crate::voxel::material::VoxelMaterial;

/// Kind of lock a transaction holds on its chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Observer of chunk lock traffic, used to instrument lock order.
pub trait LockListener: Send + Sync {
    /// Called right after the main lock of `id` is acquired.
    fn on_acquire(&self, id: ChunkId, mode: LockMode);
    /// Called right after the main lock of `id` is released.
    fn on_release(&self, id: ChunkId, mode: LockMode);
}

type ReadGuard = ArcRwLockReadGuard<RawRwLock, ChunkData>;
type WriteGuard = ArcRwLockWriteGuard<RawRwLock, ChunkData>;

/// Locked chunks shared by both transaction kinds, sorted by id.
struct LockedChunks<G: Deref<Target = ChunkData>> {
    world: IntBox,
    region: IntBox,
    depth: u8,
    generator: Arc<dyn WorldGenerator>,
    entries: Vec<(Arc<Chunk>, G)>,
    mode: LockMode,
    listener: Option<Arc<dyn LockListener>>,
}

impl<G: Deref<Target = ChunkData>> LockedChunks<G> {
    /// Lock `chunks` (already admitted, sorted by id) one after another.
    #[allow(clippy::too_many_arguments)]
    fn acquire(
        world: IntBox,
        region: IntBox,
        depth: u8,
        generator: Arc<dyn WorldGenerator>,
        chunks: Vec<Arc<Chunk>>,
        mode: LockMode,
        listener: Option<Arc<dyn LockListener>>,
        lock: impl Fn(&Arc<Chunk>) -> G,
    ) -> Self {
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let guard = lock(&chunk);
            if let Some(listener) = &listener {
                listener.on_acquire(chunk.id(), mode);
            }
            entries.push((chunk, guard));
        }
        Self { world, region, depth, generator, entries, mode, listener }
    }

    /// Entry slot and dense index for a position.
    fn locate(&self, position: IVec3) -> (usize, usize) {
        assert!(self.world.contains(position), "position {position} is outside the world {:?}", self.world);
        assert!(
            self.region.contains(position),
            "position {position} is outside the transaction region {:?}",
            self.region
        );
        let id = ChunkId::of_position(position, self.depth);
        let slot = self
            .entries
            .binary_search_by_key(&id, |(chunk, _)| chunk.id())
            .unwrap_or_else(|_| panic!("chunk {id} is not held by this transaction"));
        let origin = self.entries[slot].0.origin();
        (slot, local_index(position - origin))
    }

    fn read(&self, position: IVec3) -> (f32, VoxelMaterial) {
        let (slot, index) = self.locate(position);
        self.entries[slot].1.read(index, self.generator.as_ref())
    }

    fn slot_of(&self, id: ChunkId) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |(chunk, _)| chunk.id()).ok()
    }
}

impl<G: DerefMut<Target = ChunkData>> LockedChunks<G> {
    fn write(&mut self, position: IVec3, value: Option<f32>, material: Option<VoxelMaterial>) -> bool {
        let (slot, index) = self.locate(position);
        let generator = Arc::clone(&self.generator);
        self.entries[slot].1.write(index, value, material, generator.as_ref(), true)
    }
}

impl<G: Deref<Target = ChunkData>> Drop for LockedChunks<G> {
    fn drop(&mut self) {
        let exclusive = self.mode == LockMode::Exclusive;
        while let Some((chunk, guard)) = self.entries.pop() {
            if exclusive {
                chunk.sync_flags(&guard);
            }
            drop(guard);
            chunk.dismiss(exclusive);
            if let Some(listener) = &self.listener {
                listener.on_release(chunk.id(), self.mode);
            }
        }
    }
}

/// Shared access to a region. Obtained from [`VoxelStore::begin_get`].
///
/// [`VoxelStore::begin_get`]: crate::voxel::VoxelStore::begin_get
pub struct GetTransaction {
    inner: LockedChunks<ReadGuard>,
}

impl GetTransaction {
    pub(crate) fn acquire(
        world: IntBox,
        region: IntBox,
        depth: u8,
        generator: Arc<dyn WorldGenerator>,
        chunks: Vec<Arc<Chunk>>,
        listener: Option<Arc<dyn LockListener>>,
    ) -> Self {
        let inner = LockedChunks::acquire(
            world,
            region,
            depth,
            generator,
            chunks,
            LockMode::Shared,
            listener,
            |chunk| chunk.data().read_arc(),
        );
        Self { inner }
    }

    /// Region this transaction may read.
    pub fn region(&self) -> IntBox {
        self.inner.region
    }

    /// Ids of the locked chunks, in acquisition order.
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.inner.entries.iter().map(|(chunk, _)| chunk.id()).collect()
    }

    /// Generator that was active when the transaction began.
    pub fn generator(&self) -> &Arc<dyn WorldGenerator> {
        &self.inner.generator
    }

    pub fn value(&self, position: IVec3) -> f32 {
        self.inner.read(position).0
    }

    pub fn material(&self, position: IVec3) -> VoxelMaterial {
        self.inner.read(position).1
    }

    pub fn value_and_material(&self, position: IVec3) -> (f32, VoxelMaterial) {
        self.inner.read(position)
    }

    /// Run `f` on the locked contents of chunk `id`, if held.
    pub(crate) fn with_chunk<R>(&self, id: ChunkId, f: impl FnOnce(&ChunkData) -> R) -> Option<R> {
        let slot = self.inner.slot_of(id)?;
        Some(f(&*self.inner.entries[slot].1))
    }
}

/// Exclusive access to a region. Obtained from [`VoxelStore::begin_set`].
///
/// [`VoxelStore::begin_set`]: crate::voxel::VoxelStore::begin_set
pub struct SetTransaction {
    inner: LockedChunks<WriteGuard>,
}

impl SetTransaction {
    pub(crate) fn acquire(
        world: IntBox,
        region: IntBox,
        depth: u8,
        generator: Arc<dyn WorldGenerator>,
        chunks: Vec<Arc<Chunk>>,
        listener: Option<Arc<dyn LockListener>>,
    ) -> Self {
        let inner = LockedChunks::acquire(
            world,
            region,
            depth,
            generator,
            chunks,
            LockMode::Exclusive,
            listener,
            |chunk| chunk.data().write_arc(),
        );
        Self { inner }
    }

    pub fn region(&self) -> IntBox {
        self.inner.region
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.inner.entries.iter().map(|(chunk, _)| chunk.id()).collect()
    }

    pub fn generator(&self) -> &Arc<dyn WorldGenerator> {
        &self.inner.generator
    }

    pub fn value(&self, position: IVec3) -> f32 {
        self.inner.read(position).0
    }

    pub fn material(&self, position: IVec3) -> VoxelMaterial {
        self.inner.read(position).1
    }

    pub fn value_and_material(&self, position: IVec3) -> (f32, VoxelMaterial) {
        self.inner.read(position)
    }

    /// Write a value. Returns true if the stored voxel changed.
    pub fn set_value(&mut self, position: IVec3, value: f32) -> bool {
        self.inner.write(position, Some(value), None)
    }

    /// Write a material. Returns true if the stored voxel changed.
    pub fn set_material(&mut self, position: IVec3, material: VoxelMaterial) -> bool {
        self.inner.write(position, None, Some(material))
    }

    pub fn set_value_and_material(&mut self, position: IVec3, value: f32, material: VoxelMaterial) -> bool {
        self.inner.write(position, Some(value), Some(material))
    }

    /// Stamp an asset into every held chunk.
    pub(crate) fn stamp(&mut self, asset: &Arc<AssetInstance>) {
        for (_, data) in self.inner.entries.iter_mut() {
            data.add_asset(Arc::clone(asset));
        }
    }

    /// Run `f` on the locked contents of chunk `id`, if held.
    pub(crate) fn with_chunk_mut<R>(
        &mut self,
        id: ChunkId,
        f: impl FnOnce(&mut ChunkData, &dyn WorldGenerator) -> R,
    ) -> Option<R> {
        let slot = self.inner.slot_of(id)?;
        let generator = Arc::clone(&self.inner.generator);
        Some(f(&mut *self.inner.entries[slot].1, generator.as_ref()))
    }
}
