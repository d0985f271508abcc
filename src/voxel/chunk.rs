//! Chunks: fixed-size octree leaves, the unit of dirty tracking and locking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bitvec::vec::BitVec;
use parking_lot::{Mutex, RwLock};

use crate::core::types::IVec3;
use crate::math::IntBox;
use crate::voxel::asset::AssetInstance;
use crate::voxel::generator::WorldGenerator;
use crate::voxel::material::VoxelMaterial;

/// Number of voxels per chunk side
pub const CHUNK_SIZE: i32 = 16;

/// Number of voxels in a chunk
pub const CHUNK_VOXELS: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Index into the dense arrays of a chunk: `x + C*y + C*C*z`.
#[inline]
pub fn local_index(local: IVec3) -> usize {
    debug_assert!(local.cmpge(IVec3::ZERO).all() && local.cmplt(IVec3::splat(CHUNK_SIZE)).all());
    (local.x + CHUNK_SIZE * (local.y + CHUNK_SIZE * local.z)) as usize
}

/// Inverse of [`local_index`].
#[inline]
pub fn local_position(index: usize) -> IVec3 {
    let i = index as i32;
    IVec3::new(i % CHUNK_SIZE, (i / CHUNK_SIZE) % CHUNK_SIZE, i / (CHUNK_SIZE * CHUNK_SIZE))
}

/// Edge length in voxels of a node at `lod`.
#[inline]
pub fn node_size(lod: u8) -> i32 {
    CHUNK_SIZE << lod
}

/// Number of nodes in a complete subtree rooted at `lod`.
#[inline]
fn subtree_nodes(lod: u8) -> u64 {
    ((1u64 << (3 * (lod as u32 + 1))) - 1) / 7
}

/// Offset of child `index` inside a parent of edge `size`.
#[inline]
pub fn child_offset(index: u8, size: i32) -> IVec3 {
    let half = size / 2;
    IVec3::new(
        if index & 1 != 0 { half } else { 0 },
        if index & 2 != 0 { half } else { 0 },
        if index & 4 != 0 { half } else { 0 },
    )
}

/// Pre-order index of a node in the complete octree of the world.
///
/// Derived only from position and depth, so it is stable across runs and
/// gives every transaction the same global lock order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct ChunkId(pub u64);

impl ChunkId {
    pub const ROOT: ChunkId = ChunkId(0);

    /// Id of child `index` of the node `self` sitting at `parent_lod`.
    pub fn child(self, parent_lod: u8, index: u8) -> ChunkId {
        debug_assert!(parent_lod > 0 && index < 8);
        ChunkId(self.0 + 1 + index as u64 * subtree_nodes(parent_lod - 1))
    }

    /// Id of the leaf chunk containing `position` in a world of `depth`.
    pub fn of_position(position: IVec3, depth: u8) -> ChunkId {
        let mut id = ChunkId::ROOT;
        let mut origin = world_min(depth);
        let mut lod = depth;
        while lod > 0 {
            let half = node_size(lod) / 2;
            let index = child_index_for(position - origin, half);
            origin += child_offset(index, node_size(lod));
            id = id.child(lod, index);
            lod -= 1;
        }
        id
    }

    /// Origin of the leaf chunk this id names, or None if it names an
    /// internal node or lies outside a world of `depth`.
    pub fn leaf_origin(self, depth: u8) -> Option<IVec3> {
        if self.0 >= subtree_nodes(depth) {
            return None;
        }
        let mut rem = self.0;
        let mut origin = world_min(depth);
        let mut lod = depth;
        while lod > 0 {
            if rem == 0 {
                return None;
            }
            rem -= 1;
            let sub = subtree_nodes(lod - 1);
            let index = (rem / sub) as u8;
            rem %= sub;
            origin += child_offset(index, node_size(lod));
            lod -= 1;
        }
        (rem == 0).then_some(origin)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Minimum corner of a world of `depth`.
#[inline]
pub fn world_min(depth: u8) -> IVec3 {
    IVec3::splat(-(node_size(depth) / 2))
}

#[inline]
fn child_index_for(local: IVec3, half: i32) -> u8 {
    (local.x >= half) as u8 | ((local.y >= half) as u8) << 1 | ((local.z >= half) as u8) << 2
}

/// Dense per-voxel arrays, present only once a chunk is edited.
#[derive(Clone)]
pub(crate) struct DenseVoxels {
    pub values: Box<[f32]>,
    pub materials: Box<[VoxelMaterial]>,
}

/// Lock-protected contents of a chunk.
pub struct ChunkData {
    origin: IVec3,
    multiplayer: bool,
    dense: Option<DenseVoxels>,
    /// Stamped assets not yet rasterized, in stamping order
    assets: Vec<Arc<AssetInstance>>,
    /// Voxels changed since the last diff flush (multiplayer only)
    dirty_values: BitVec,
    dirty_materials: BitVec,
    network_dirty: bool,
}

impl ChunkData {
    fn new(origin: IVec3, multiplayer: bool) -> Self {
        let bits = if multiplayer { CHUNK_VOXELS } else { 0 };
        Self {
            origin,
            multiplayer,
            dense: None,
            assets: Vec::new(),
            dirty_values: BitVec::repeat(false, bits),
            dirty_materials: BitVec::repeat(false, bits),
            network_dirty: false,
        }
    }

    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    /// Has this chunk been edited (materialized into dense arrays)?
    pub fn is_dirty(&self) -> bool {
        self.dense.is_some()
    }

    pub fn is_network_dirty(&self) -> bool {
        self.network_dirty
    }

    /// Number of stamped assets awaiting rasterization.
    pub fn pending_assets(&self) -> usize {
        self.assets.len()
    }

    /// Value and material at a dense index.
    pub fn read(&self, index: usize, generator: &dyn WorldGenerator) -> (f32, VoxelMaterial) {
        match &self.dense {
            Some(dense) => (dense.values[index], dense.materials[index]),
            None => self.synthesize(self.origin + local_position(index), generator),
        }
    }

    fn synthesize(&self, position: IVec3, generator: &dyn WorldGenerator) -> (f32, VoxelMaterial) {
        let (value, material) = generator.evaluate(position);
        self.assets
            .iter()
            .fold((value, material), |(v, m), asset| asset.apply(position, v, m))
    }

    /// Allocate dense arrays seeded from the generator and pending assets.
    /// Returns true if this call materialized the chunk.
    pub(crate) fn materialize(&mut self, generator: &dyn WorldGenerator) -> bool {
        if self.dense.is_some() {
            return false;
        }
        let mut values = Vec::with_capacity(CHUNK_VOXELS);
        let mut materials = Vec::with_capacity(CHUNK_VOXELS);
        for index in 0..CHUNK_VOXELS {
            let (v, m) = self.synthesize(self.origin + local_position(index), generator);
            values.push(v);
            materials.push(m);
        }
        self.dense = Some(DenseVoxels {
            values: values.into_boxed_slice(),
            materials: materials.into_boxed_slice(),
        });
        self.assets.clear();
        true
    }

    /// Write value and/or material at a dense index. Returns true if the
    /// stored voxel changed.
    pub(crate) fn write(
        &mut self,
        index: usize,
        value: Option<f32>,
        material: Option<VoxelMaterial>,
        generator: &dyn WorldGenerator,
        track_network: bool,
    ) -> bool {
        self.materialize(generator);
        let track = track_network && self.multiplayer;
        let Some(dense) = self.dense.as_mut() else {
            return false;
        };

        let mut changed = false;
        if let Some(v) = value {
            if dense.values[index].to_bits() != v.to_bits() {
                dense.values[index] = v;
                changed = true;
                if track {
                    self.dirty_values.set(index, true);
                    self.network_dirty = true;
                }
            }
        }
        if let Some(m) = material {
            if dense.materials[index] != m {
                dense.materials[index] = m;
                changed = true;
                if track {
                    self.dirty_materials.set(index, true);
                    self.network_dirty = true;
                }
            }
        }
        changed
    }

    /// Stamp an asset. Dirty chunks rasterize it at once; clean chunks keep
    /// it pending until they materialize.
    pub(crate) fn add_asset(&mut self, asset: Arc<AssetInstance>) {
        if self.dense.is_none() {
            self.assets.push(asset);
            return;
        }

        let chunk_box = IntBox::from_min_size(self.origin, IVec3::splat(CHUNK_SIZE));
        let Some(overlap) = chunk_box.intersection(&asset.bounds()) else {
            return;
        };
        for position in overlap.iter() {
            let index = local_index(position - self.origin);
            let Some(dense) = self.dense.as_ref() else { break };
            let (value, material) = asset.apply(position, dense.values[index], dense.materials[index]);
            self.write_materialized(index, value, material);
        }
    }

    fn write_materialized(&mut self, index: usize, value: f32, material: VoxelMaterial) {
        let Some(dense) = self.dense.as_mut() else { return };
        let value_changed = dense.values[index].to_bits() != value.to_bits();
        let material_changed = dense.materials[index] != material;
        dense.values[index] = value;
        dense.materials[index] = material;
        if self.multiplayer {
            if value_changed {
                self.dirty_values.set(index, true);
            }
            if material_changed {
                self.dirty_materials.set(index, true);
            }
            self.network_dirty |= value_changed || material_changed;
        }
    }

    /// Replace the dense arrays wholesale (save loading). Returns the dense
    /// indices whose value or material differs from what was readable before.
    pub(crate) fn load_arrays(
        &mut self,
        values: &[f32],
        materials: &[VoxelMaterial],
        generator: &dyn WorldGenerator,
    ) -> Vec<usize> {
        debug_assert_eq!(values.len(), CHUNK_VOXELS);
        debug_assert_eq!(materials.len(), CHUNK_VOXELS);
        let changed = (0..CHUNK_VOXELS)
            .filter(|&i| {
                let (v, m) = self.read(i, generator);
                v.to_bits() != values[i].to_bits() || m != materials[i]
            })
            .collect();
        self.dense = Some(DenseVoxels {
            values: values.into(),
            materials: materials.into(),
        });
        self.assets.clear();
        changed
    }

    /// Drop dense arrays and network state, returning to generator output.
    /// Returns the dense indices whose readable voxel changed.
    pub(crate) fn reset(&mut self, generator: &dyn WorldGenerator) -> Vec<usize> {
        let Some(dense) = self.dense.take() else {
            return Vec::new();
        };
        let changed = (0..CHUNK_VOXELS)
            .filter(|&i| {
                let (v, m) = self.synthesize(self.origin + local_position(i), generator);
                v.to_bits() != dense.values[i].to_bits() || m != dense.materials[i]
            })
            .collect();
        self.dirty_values.fill(false);
        self.dirty_materials.fill(false);
        self.network_dirty = false;
        changed
    }

    /// Dense arrays, if materialized.
    pub(crate) fn dense(&self) -> Option<&DenseVoxels> {
        self.dense.as_ref()
    }

    /// Drain network dirty voxels as (index, value) and (index, material).
    pub(crate) fn take_network_diffs(&mut self) -> (Vec<(u32, f32)>, Vec<(u32, VoxelMaterial)>) {
        if !self.network_dirty {
            return (Vec::new(), Vec::new());
        }
        self.network_dirty = false;
        let Some(dense) = self.dense.as_ref() else {
            self.dirty_values.fill(false);
            self.dirty_materials.fill(false);
            return (Vec::new(), Vec::new());
        };
        let values = self
            .dirty_values
            .iter_ones()
            .map(|i| (i as u32, dense.values[i]))
            .collect();
        let materials = self
            .dirty_materials
            .iter_ones()
            .map(|i| (i as u32, dense.materials[i]))
            .collect();
        self.dirty_values.fill(false);
        self.dirty_materials.fill(false);
        (values, materials)
    }
}

/// Pending transaction counts, guarded by the admission lock.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Admission {
    pub gets: u32,
    pub sets: u32,
}

impl Admission {
    pub fn is_idle(&self) -> bool {
        self.gets == 0 && self.sets == 0
    }
}

/// A leaf of the octree.
///
/// The main lock protects the voxel contents and is held for the length of
/// a transaction. The admission lock is only held while a transaction is
/// being admitted or released.
pub struct Chunk {
    id: ChunkId,
    origin: IVec3,
    data: Arc<RwLock<ChunkData>>,
    admission: Mutex<Admission>,
    /// Mirrors `ChunkData::is_dirty` for lock-free emptiness checks
    dirty: AtomicBool,
    /// Set once any asset touches this chunk
    stamped: AtomicBool,
}

impl Chunk {
    /// Create an unedited, generator-backed chunk.
    pub fn new(id: ChunkId, origin: IVec3, multiplayer: bool) -> Self {
        Self {
            id,
            origin,
            data: Arc::new(RwLock::new(ChunkData::new(origin, multiplayer))),
            admission: Mutex::new(Admission::default()),
            dirty: AtomicBool::new(false),
            stamped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    pub fn bounds(&self) -> IntBox {
        IntBox::from_min_size(self.origin, IVec3::splat(CHUNK_SIZE))
    }

    /// Main lock handle, for guards that outlive a borrow of the chunk.
    pub(crate) fn data(&self) -> &Arc<RwLock<ChunkData>> {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn is_stamped(&self) -> bool {
        self.stamped.load(Ordering::Acquire)
    }

    /// Refresh the lock-free flags from locked contents.
    pub(crate) fn sync_flags(&self, data: &ChunkData) {
        self.dirty.store(data.is_dirty(), Ordering::Release);
        self.stamped.store(data.pending_assets() > 0, Ordering::Release);
    }

    pub(crate) fn admit(&self, exclusive: bool) {
        let mut admission = self.admission.lock();
        if exclusive {
            admission.sets += 1;
        } else {
            admission.gets += 1;
        }
    }

    pub(crate) fn dismiss(&self, exclusive: bool) {
        let mut admission = self.admission.lock();
        if exclusive {
            admission.sets -= 1;
        } else {
            admission.gets -= 1;
        }
    }

    /// Can this chunk be pruned back to the generator without losing data?
    pub(crate) fn is_prunable(&self) -> bool {
        self.admission.lock().is_idle() && !self.is_dirty() && !self.is_stamped()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::asset::AssetMode;
    use crate::voxel::generator::FlatGenerator;

    fn flat() -> FlatGenerator {
        FlatGenerator::new(0, VoxelMaterial::new(1))
    }

    #[test]
    fn test_local_index_round_trip() {
        for index in [0, 1, 15, 16, 255, 256, CHUNK_VOXELS - 1] {
            assert_eq!(local_index(local_position(index)), index);
        }
        assert_eq!(local_index(IVec3::new(1, 2, 3)), 1 + 16 * 2 + 256 * 3);
    }

    #[test]
    fn test_chunk_id_depth_zero() {
        assert_eq!(ChunkId::of_position(IVec3::ZERO, 0), ChunkId::ROOT);
        assert_eq!(ChunkId::ROOT.leaf_origin(0), Some(IVec3::splat(-8)));
        assert_eq!(ChunkId(1).leaf_origin(0), None);
    }

    #[test]
    fn test_chunk_id_depth_one() {
        // Children of the root are 1..=8 in child-index order
        assert_eq!(ChunkId::of_position(IVec3::splat(-1), 1), ChunkId(1));
        assert_eq!(ChunkId::of_position(IVec3::new(0, -1, -1), 1), ChunkId(2));
        assert_eq!(ChunkId::of_position(IVec3::splat(5), 1), ChunkId(8));
        assert_eq!(ChunkId(8).leaf_origin(1), Some(IVec3::ZERO));
        assert_eq!(ChunkId::ROOT.leaf_origin(1), None);
    }

    #[test]
    fn test_chunk_id_round_trip() {
        let depth = 3;
        let half = node_size(depth) / 2;
        for p in [IVec3::splat(-half), IVec3::new(5, -17, 33), IVec3::splat(half - 1)] {
            let id = ChunkId::of_position(p, depth);
            let origin = id.leaf_origin(depth).unwrap();
            assert!(IntBox::from_min_size(origin, IVec3::splat(CHUNK_SIZE)).contains(p));
        }
        // Internal node ids decode to nothing
        assert_eq!(ChunkId(1).leaf_origin(depth), None);
    }

    #[test]
    fn test_chunk_ids_follow_spatial_order() {
        let depth = 2;
        let a = ChunkId::of_position(IVec3::new(-32, -32, -32), depth);
        let b = ChunkId::of_position(IVec3::new(-16, -32, -32), depth);
        let c = ChunkId::of_position(IVec3::new(0, -32, -32), depth);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_clean_chunk_reads_generator() {
        let data = ChunkData::new(IVec3::new(0, -16, 0), false);
        let generator = flat();
        let (value, material) = data.read(local_index(IVec3::new(0, 0, 0)), &generator);
        assert_eq!(value, -1.0);
        assert_eq!(material, VoxelMaterial::new(1));
        assert!(!data.is_dirty());
    }

    #[test]
    fn test_write_materializes() {
        let mut data = ChunkData::new(IVec3::ZERO, false);
        let generator = flat();
        let index = local_index(IVec3::new(3, 3, 3));

        assert!(data.write(index, Some(-0.5), None, &generator, true));
        assert!(data.is_dirty());
        assert_eq!(data.read(index, &generator).0, -0.5);
        // Neighbours were seeded from the generator
        let other = local_index(IVec3::new(3, 4, 3));
        assert_eq!(data.read(other, &generator), generator.evaluate(IVec3::new(3, 4, 3)));
        // Same value again is not a change
        assert!(!data.write(index, Some(-0.5), None, &generator, true));
    }

    #[test]
    fn test_network_bits() {
        let mut data = ChunkData::new(IVec3::ZERO, true);
        let generator = flat();
        data.write(7, Some(-1.0), None, &generator, true);
        data.write(9, None, Some(VoxelMaterial::new(5)), &generator, true);
        assert!(data.is_network_dirty());

        let (values, materials) = data.take_network_diffs();
        assert_eq!(values, vec![(7, -1.0)]);
        assert_eq!(materials, vec![(9, VoxelMaterial::new(5))]);
        assert!(!data.is_network_dirty());
        assert_eq!(data.take_network_diffs(), (Vec::new(), Vec::new()));
    }

    #[test]
    fn test_untracked_write_skips_network_bits() {
        let mut data = ChunkData::new(IVec3::ZERO, true);
        data.write(7, Some(-1.0), None, &flat(), false);
        assert!(data.is_dirty());
        assert!(!data.is_network_dirty());
    }

    #[test]
    fn test_pending_asset_then_materialize() {
        let mut data = ChunkData::new(IVec3::ZERO, false);
        let generator = flat();
        let bounds = IntBox::new(IVec3::ZERO, IVec3::splat(2));
        data.add_asset(Arc::new(AssetInstance::from_fn(bounds, AssetMode::Destructive, |_| {
            (-1.0, VoxelMaterial::new(9))
        })));

        assert_eq!(data.pending_assets(), 1);
        assert_eq!(data.read(0, &generator), (-1.0, VoxelMaterial::new(9)));

        data.materialize(&generator);
        assert_eq!(data.pending_assets(), 0);
        assert_eq!(data.read(0, &generator), (-1.0, VoxelMaterial::new(9)));
    }

    #[test]
    fn test_reset_reports_changes() {
        let mut data = ChunkData::new(IVec3::ZERO, true);
        let generator = flat();
        data.write(4, Some(-1.0), None, &generator, true);
        let changed = data.reset(&generator);
        assert_eq!(changed, vec![4]);
        assert!(!data.is_dirty());
        assert!(!data.is_network_dirty());
    }

    #[test]
    fn test_prunable_respects_admission() {
        let chunk = Chunk::new(ChunkId(1), IVec3::ZERO, false);
        assert!(chunk.is_prunable());
        chunk.admit(false);
        assert!(!chunk.is_prunable());
        chunk.dismiss(false);
        assert!(chunk.is_prunable());
    }
}
