//! Voxel store: root coordinator owning the octree.

use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};
use rayon::ThreadPool;

use crate::core::config::StoreConfig;
use crate::core::types::{IVec3, Result};
use crate::math::IntBox;
use crate::voxel::asset::AssetInstance;
use crate::voxel::chunk::{node_size, world_min, Chunk};
use crate::voxel::generator::{is_inside_sphere, SphereSwapGenerator, WorldGenerator};
use crate::voxel::octree::{DiscardAction, Octree, StoreStats};
use crate::voxel::transaction::{GetTransaction, LockListener, SetTransaction};

/// Hierarchical voxel store.
///
/// Shared between worker threads by reference (or `Arc`); every operation
/// takes `&self`. Reads and writes go through [`GetTransaction`] and
/// [`SetTransaction`] guards, which lock the chunks of their region in
/// increasing id order.
pub struct VoxelStore {
    config: StoreConfig,
    world: IntBox,
    octree: RwLock<Octree>,
    generator: Mutex<Arc<dyn WorldGenerator>>,
    pool: Option<Arc<ThreadPool>>,
    listener: Option<Arc<dyn LockListener>>,
}

impl VoxelStore {
    /// Create a store with an empty, generator-backed world.
    pub fn new(config: StoreConfig, generator: Arc<dyn WorldGenerator>) -> Result<Self> {
        config.validate()?;
        let world = IntBox::from_min_size(world_min(config.depth), IVec3::splat(node_size(config.depth)));
        debug!("Creating voxel store: depth {}, world {:?}", config.depth, world);
        Ok(Self {
            octree: RwLock::new(Octree::new(config.depth, config.multiplayer)),
            config,
            world,
            generator: Mutex::new(generator),
            pool: None,
            listener: None,
        })
    }

    /// Run bulk work (save collection) on this pool instead of the caller's thread.
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Report every chunk lock acquisition and release to `listener`.
    pub fn with_lock_listener(mut self, listener: Arc<dyn LockListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn depth(&self) -> u8 {
        self.config.depth
    }

    pub fn is_multiplayer(&self) -> bool {
        self.config.multiplayer
    }

    /// Extents of the world.
    pub fn bounds(&self) -> IntBox {
        self.world
    }

    pub fn is_in_world(&self, position: IVec3) -> bool {
        self.world.contains(position)
    }

    pub(crate) fn pool(&self) -> Option<&Arc<ThreadPool>> {
        self.pool.as_ref()
    }

    /// Currently active generator.
    pub fn world_generator(&self) -> Arc<dyn WorldGenerator> {
        Arc::clone(&self.generator.lock())
    }

    /// Leaves allocated right now, in increasing id order.
    pub(crate) fn leaves(&self) -> Vec<Arc<Chunk>> {
        self.octree.read().all_leaves()
    }

    /// Find (creating if needed) and admit every leaf of `region`.
    ///
    /// Admission happens under the structure lock so pruning can never
    /// remove a chunk between lookup and locking.
    fn admit(&self, region: &IntBox, exclusive: bool) -> (IntBox, Vec<Arc<Chunk>>) {
        let Some(clipped) = self.world.intersection(region) else {
            panic!("region {region:?} lies outside the world {:?}", self.world);
        };

        {
            let tree = self.octree.read();
            if let Some(chunks) = tree.leaves_for(&clipped) {
                for chunk in &chunks {
                    chunk.admit(exclusive);
                }
                return (clipped, chunks);
            }
        }

        let mut tree = self.octree.write();
        let chunks = tree.leaves_for_mut(&clipped);
        for chunk in &chunks {
            chunk.admit(exclusive);
        }
        (clipped, chunks)
    }

    /// Open a read transaction over `region`, blocking until every chunk
    /// in it can be locked shared.
    ///
    /// # Panics
    /// If the region does not overlap the world.
    pub fn begin_get(&self, region: IntBox) -> GetTransaction {
        let (region, chunks) = self.admit(&region, false);
        GetTransaction::acquire(
            self.world,
            region,
            self.depth(),
            self.world_generator(),
            chunks,
            self.listener.clone(),
        )
    }

    /// Close a read transaction. Dropping it is equivalent.
    pub fn end_get(&self, transaction: GetTransaction) {
        drop(transaction);
    }

    /// Open a write transaction over `region`, blocking until every chunk
    /// in it can be locked exclusively.
    ///
    /// # Panics
    /// If the region does not overlap the world.
    pub fn begin_set(&self, region: IntBox) -> SetTransaction {
        let (region, chunks) = self.admit(&region, true);
        SetTransaction::acquire(
            self.world,
            region,
            self.depth(),
            self.world_generator(),
            chunks,
            self.listener.clone(),
        )
    }

    /// Close a write transaction. Dropping it is equivalent.
    pub fn end_set(&self, transaction: SetTransaction) {
        drop(transaction);
    }

    /// True when no edited or stamped chunk intersects `region`, meaning
    /// every voxel there still reads the generator.
    pub fn is_empty(&self, region: &IntBox) -> bool {
        self.octree
            .read()
            .existing_leaves(region)
            .iter()
            .all(|chunk| !chunk.is_dirty() && !chunk.is_stamped())
    }

    /// Stamp an asset into every chunk its bounds overlap.
    ///
    /// Locks the asset bounds exclusively, so it serializes with any
    /// overlapping write transaction.
    ///
    /// On a chunk nobody has written to, the stamp stays local: it sets no
    /// network bits, and the chunk is not part of
    /// [`collect_dirty_chunks_for_save`](Self::collect_dirty_chunks_for_save)
    /// until a later write materializes it. Peers and reloaded worlds must add
    /// the same assets themselves. Dirty chunks rasterize the asset at once
    /// and track it like any other write.
    pub fn add_asset(&self, asset: Arc<AssetInstance>) {
        let Some(bounds) = self.world.intersection(&asset.bounds()) else {
            debug!("Asset {:?} lies outside the world, ignoring", asset.bounds());
            return;
        };
        let mut transaction = self.begin_set(bounds);
        transaction.stamp(&asset);
        debug!("Stamped asset over {} chunks", transaction.chunk_ids().len());
    }

    /// Replace the generator and drop every unedited chunk.
    pub fn set_world_generator(&self, generator: Arc<dyn WorldGenerator>) {
        *self.generator.lock() = generator;
        self.discard_by_predicate(|_| DiscardAction::Discard);
    }

    /// Keep the current generator inside the sphere and use `generator`
    /// outside it.
    pub fn swap_world_generator_sphere(&self, generator: Arc<dyn WorldGenerator>, center: IVec3, radius: f32) {
        {
            let mut active = self.generator.lock();
            let old = Arc::clone(&active);
            *active = Arc::new(SphereSwapGenerator::new(old, generator, center, radius));
        }

        let reach = radius.max(0.0).ceil() as i32;
        let sphere_box = IntBox::around(center, reach);
        self.discard_by_predicate(|node| {
            if node.corners().iter().all(|&c| is_inside_sphere(c, center, radius)) {
                DiscardAction::Keep
            } else if !node.intersects(&sphere_box) {
                DiscardAction::Discard
            } else {
                DiscardAction::Recurse
            }
        });
    }

    /// Walk the octree top-down and prune content-free chunks where the
    /// predicate says so. Returns the number of chunks removed.
    pub fn discard_by_predicate(&self, mut predicate: impl FnMut(&IntBox) -> DiscardAction) -> usize {
        let mut tree = self.octree.write();
        let pruned = tree.discard_by_predicate(&mut predicate);
        debug!("Discarded {} chunks, now {:?}", pruned, tree.stats());
        pruned
    }

    pub fn stats(&self) -> StoreStats {
        self.octree.read().stats()
    }
}

impl std::fmt::Debug for VoxelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelStore")
            .field("config", &self.config)
            .field("world", &self.world)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::thread::{self, ThreadId};

    use super::*;
    use crate::voxel::asset::AssetMode;
    use crate::voxel::chunk::ChunkId;
    use crate::voxel::generator::{FlatGenerator, SphereGenerator};
    use crate::voxel::material::VoxelMaterial;
    use crate::voxel::transaction::LockMode;

    fn flat_store(depth: u8) -> VoxelStore {
        let generator = Arc::new(FlatGenerator::new(0, VoxelMaterial::new(1)));
        VoxelStore::new(StoreConfig::new(depth), generator).unwrap()
    }

    #[test]
    fn test_rejects_bad_depth() {
        let generator = Arc::new(FlatGenerator::new(0, VoxelMaterial::new(1)));
        assert!(VoxelStore::new(StoreConfig::new(40), generator).is_err());
    }

    #[test]
    fn test_bounds() {
        let store = flat_store(2);
        assert!(store.is_in_world(IVec3::splat(-32)));
        assert!(store.is_in_world(IVec3::splat(31)));
        assert!(!store.is_in_world(IVec3::new(0, 32, 0)));
    }

    #[test]
    fn test_generator_fallback() {
        let store = flat_store(2);
        let generator = FlatGenerator::new(0, VoxelMaterial::new(1));
        let txn = store.begin_get(store.bounds());
        for p in store.bounds().iter().step_by(7) {
            assert_eq!(txn.value_and_material(p), generator.evaluate(p));
        }
        store.end_get(txn);
        assert_eq!(store.stats().dirty_chunks, 0);
    }

    #[test]
    fn test_read_after_write() {
        let store = flat_store(2);
        let positions = [IVec3::new(-32, -32, -32), IVec3::new(3, 4, 5), IVec3::splat(31)];
        for (i, &p) in positions.iter().enumerate() {
            let mut txn = store.begin_set(IntBox::from_point(p));
            assert!(txn.set_value(p, -0.25 * i as f32 - 0.1));
            txn.set_material(p, VoxelMaterial::new(7));
            store.end_set(txn);
        }
        for (i, &p) in positions.iter().enumerate() {
            let txn = store.begin_get(IntBox::from_point(p));
            assert_eq!(txn.value(p), -0.25 * i as f32 - 0.1);
            assert_eq!(txn.material(p), VoxelMaterial::new(7));
        }
        assert_eq!(store.stats().dirty_chunks, 3);
    }

    #[test]
    #[should_panic(expected = "outside the world")]
    fn test_read_outside_world_panics() {
        let store = flat_store(1);
        let txn = store.begin_get(IntBox::around(IVec3::new(15, 0, 0), 1));
        txn.value(IVec3::new(16, 0, 0));
    }

    #[test]
    #[should_panic(expected = "outside the transaction region")]
    fn test_write_outside_region_panics() {
        let store = flat_store(2);
        let mut txn = store.begin_set(IntBox::from_point(IVec3::ZERO));
        txn.set_value(IVec3::ONE, 0.0);
    }

    #[test]
    #[should_panic(expected = "outside the world")]
    fn test_write_outside_world_panics() {
        let store = flat_store(1);
        let mut txn = store.begin_set(IntBox::around(IVec3::new(0, 0, 15), 1));
        txn.set_value(IVec3::new(0, 0, 16), -1.0);
    }

    #[test]
    #[should_panic(expected = "malformed region")]
    fn test_malformed_region_panics() {
        let store = flat_store(2);
        store.begin_get(IntBox::new(IVec3::ZERO, IVec3::new(1, 0, 1)));
    }

    #[test]
    fn test_is_empty() {
        let store = flat_store(3);
        let region = IntBox::new(IVec3::ZERO, IVec3::splat(16));
        assert!(store.is_empty(&region));

        // Reading does not count as content
        drop(store.begin_get(region));
        assert!(store.is_empty(&region));

        let mut txn = store.begin_set(IntBox::from_point(IVec3::new(2, 2, 2)));
        txn.set_value(IVec3::new(2, 2, 2), -1.0);
        drop(txn);
        assert!(!store.is_empty(&region));
        assert!(store.is_empty(&IntBox::new(IVec3::splat(-16), IVec3::ZERO)));
    }

    #[test]
    fn test_asset_visible_before_materialization() {
        let store = flat_store(2);
        let bounds = IntBox::new(IVec3::new(10, 10, 10), IVec3::new(20, 12, 12));
        let asset = AssetInstance::from_fn(bounds, AssetMode::Additive, |_| (-1.0, VoxelMaterial::new(3)));
        store.add_asset(Arc::new(asset));

        let stats = store.stats();
        assert_eq!(stats.dirty_chunks, 0);
        assert_eq!(stats.stamped_chunks, 2);
        assert!(!store.is_empty(&bounds));

        let txn = store.begin_get(bounds);
        assert_eq!(txn.value_and_material(IVec3::new(15, 11, 11)), (-1.0, VoxelMaterial::new(3)));
        // Outside the asset the generator shows through
        assert_eq!(txn.value(IVec3::new(15, 11, 12)), 1.0);
    }

    #[test]
    fn test_asset_on_clean_chunk_stays_local() {
        let config = StoreConfig::new(2).with_multiplayer(true);
        let store = VoxelStore::new(config, Arc::new(FlatGenerator::new(0, VoxelMaterial::new(1)))).unwrap();
        let bounds = IntBox::new(IVec3::new(2, 2, 2), IVec3::new(4, 4, 4));
        store.add_asset(Arc::new(AssetInstance::from_fn(bounds, AssetMode::Destructive, |_| {
            (-1.0, VoxelMaterial::new(5))
        })));

        assert!(store.collect_diff_queues().is_empty());
        assert!(store.collect_dirty_chunks_for_save().is_empty());

        // A write materializes the chunk, asset included, but only the
        // written voxel goes out as a diff
        let mut txn = store.begin_set(IntBox::from_point(IVec3::ZERO));
        txn.set_value(IVec3::ZERO, -0.5);
        drop(txn);
        assert_eq!(store.collect_diff_queues().values.len(), 1);
        let save = store.collect_dirty_chunks_for_save();
        assert_eq!(save.chunks.len(), 1);
        assert!(save.chunks[0].materials.contains(&VoxelMaterial::new(5)));
    }

    #[test]
    fn test_later_destructive_asset_wins() {
        let store = flat_store(2);
        let bounds = IntBox::new(IVec3::ZERO, IVec3::splat(4));
        store.add_asset(Arc::new(AssetInstance::from_fn(bounds, AssetMode::Additive, |_| {
            (-1.0, VoxelMaterial::new(3))
        })));
        store.add_asset(Arc::new(AssetInstance::from_fn(bounds, AssetMode::Destructive, |_| {
            (0.5, VoxelMaterial::new(4))
        })));

        let mut txn = store.begin_set(bounds);
        assert_eq!(txn.value_and_material(IVec3::ONE), (0.5, VoxelMaterial::new(4)));
        // Materializing keeps the composed result
        txn.set_value(IVec3::ZERO, 0.0);
        assert_eq!(txn.value_and_material(IVec3::ONE), (0.5, VoxelMaterial::new(4)));
    }

    #[test]
    fn test_set_world_generator_keeps_edits() {
        let store = flat_store(2);
        let edited = IVec3::new(1, 1, 1);
        let mut txn = store.begin_set(IntBox::from_point(edited));
        txn.set_value(edited, -0.5);
        drop(txn);
        drop(store.begin_get(store.bounds()));

        store.set_world_generator(Arc::new(FlatGenerator::new(20, VoxelMaterial::new(2))));
        assert_eq!(store.stats().leaves, 8);

        let txn = store.begin_get(store.bounds());
        assert_eq!(txn.value(edited), -0.5);
        assert_eq!(txn.value(IVec3::new(1, 1, -20)), -1.0);
        assert_eq!(txn.material(IVec3::new(-20, 5, 5)), VoxelMaterial::new(2));
    }

    #[test]
    fn test_swap_world_generator_sphere() {
        let store = VoxelStore::new(
            StoreConfig::new(3),
            Arc::new(SphereGenerator::new(100.0, VoxelMaterial::new(1))),
        )
        .unwrap();
        let old = SphereGenerator::new(100.0, VoxelMaterial::new(1));
        let new = FlatGenerator::new(-3, VoxelMaterial::new(2));

        let edited = IVec3::new(40, 40, 40);
        let mut txn = store.begin_set(IntBox::from_point(edited));
        txn.set_value(edited, 0.75);
        drop(txn);
        drop(store.begin_get(store.bounds()));

        store.swap_world_generator_sphere(Arc::new(new.clone()), IVec3::ZERO, 5.0);

        let chunk_diagonal = (3.0f32).sqrt() * 16.0;
        let edited_chunk = IntBox::from_min_size(IVec3::splat(32), IVec3::splat(16));
        let txn = store.begin_get(store.bounds());
        for p in store.bounds().iter().step_by(3) {
            let distance = p.as_vec3().length();
            // The edited chunk was materialized from the old generator
            if edited_chunk.contains(p) {
                continue;
            }
            if distance < 5.0 {
                assert_eq!(txn.value_and_material(p), old.evaluate(p), "inside at {p}");
            } else if distance > 5.0 + chunk_diagonal {
                assert_eq!(txn.value_and_material(p), new.evaluate(p), "outside at {p}");
            }
        }
        assert_eq!(txn.value(edited), 0.75);
    }

    #[test]
    fn test_discard_skips_admitted_chunks() {
        let store = flat_store(2);
        let txn = store.begin_get(IntBox::from_point(IVec3::ZERO));
        assert_eq!(store.discard_by_predicate(|_| DiscardAction::Discard), 0);
        drop(txn);
        assert_eq!(store.discard_by_predicate(|_| DiscardAction::Discard), 8);
    }

    #[test]
    fn test_transaction_chunks_sorted() {
        let store = flat_store(3);
        let txn = store.begin_get(IntBox::new(IVec3::splat(-20), IVec3::splat(20)));
        let ids = txn.chunk_ids();
        assert_eq!(ids.len(), 64);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    /// Checks, per thread, that locks are taken in increasing id order and
    /// released in exactly the reverse order.
    #[derive(Default)]
    struct OrderChecker {
        held: Mutex<HashMap<ThreadId, Vec<ChunkId>>>,
        violations: Mutex<Vec<String>>,
        acquisitions: Mutex<usize>,
    }

    impl LockListener for OrderChecker {
        fn on_acquire(&self, id: ChunkId, mode: LockMode) {
            *self.acquisitions.lock() += 1;
            let mut held = self.held.lock();
            let stack = held.entry(thread::current().id()).or_default();
            if let Some(&top) = stack.last() {
                if top >= id {
                    self.violations.lock().push(format!("{mode:?} acquire {id} after {top}"));
                }
            }
            stack.push(id);
        }

        fn on_release(&self, id: ChunkId, mode: LockMode) {
            let mut held = self.held.lock();
            let stack = held.entry(thread::current().id()).or_default();
            if stack.pop() != Some(id) {
                self.violations.lock().push(format!("{mode:?} release {id} out of order"));
            }
        }
    }

    #[test]
    fn test_concurrent_lock_order() {
        let checker = Arc::new(OrderChecker::default());
        let store = flat_store(3).with_lock_listener(checker.clone());

        thread::scope(|scope| {
            for worker in 0..6u32 {
                let store = &store;
                scope.spawn(move || {
                    let mut seed = 0x9E37_79B9u32.wrapping_mul(worker + 1);
                    let mut next = move || {
                        seed ^= seed << 13;
                        seed ^= seed >> 17;
                        seed ^= seed << 5;
                        (seed % 48) as i32 - 24
                    };
                    for round in 0..150 {
                        let center = IVec3::new(next(), next(), next());
                        let region = IntBox::around(center, 12);
                        if (round + worker) % 3 == 0 {
                            let mut txn = store.begin_set(region);
                            txn.set_value(center, worker as f32 * -0.1);
                            store.end_set(txn);
                        } else {
                            let txn = store.begin_get(region);
                            let _ = txn.value(center);
                            store.end_get(txn);
                        }
                    }
                });
            }
        });

        assert!(checker.violations.lock().is_empty(), "{:?}", checker.violations.lock());
        assert!(*checker.acquisitions.lock() > 0);
        assert!(checker.held.lock().values().all(|stack| stack.is_empty()));
    }

    #[test]
    fn test_overlapping_transactions_share_order() {
        // Two transactions over overlapping regions both need the chunk at
        // the origin; it must come before any higher id either takes.
        let store = flat_store(2);
        let shared = ChunkId::of_position(IVec3::ZERO, 2);

        let a = store.begin_get(IntBox::new(IVec3::splat(-10), IVec3::splat(10)));
        let b = store.begin_get(IntBox::new(IVec3::ZERO, IVec3::splat(20)));
        for ids in [a.chunk_ids(), b.chunk_ids()] {
            let position = ids.iter().position(|&id| id == shared).unwrap();
            assert!(ids[..position].iter().all(|&id| id < shared));
            assert!(ids[position + 1..].iter().all(|&id| id > shared));
        }
    }
}
