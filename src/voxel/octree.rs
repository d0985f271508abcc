//! Arena-backed octree of chunks.
//!
//! Nodes live in a slab indexed by `u32`; a node is either ungenerated
//! (everything below reads from the generator), a leaf chunk at lod 0, or an
//! internal node with all eight children present.

use std::sync::Arc;

use crate::core::types::IVec3;
use crate::math::IntBox;
use crate::voxel::chunk::{child_offset, node_size, world_min, Chunk, ChunkId};

/// Deepest supported octree. Keeps every pre-order id inside a `u64`.
pub const MAX_DEPTH: u8 = 19;

const ROOT_INDEX: u32 = 0;

/// Verdict of a discard predicate for one node's bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardAction {
    /// Leave the subtree untouched and stop descending.
    Keep,
    /// Prune every content-free chunk of the subtree and stop descending.
    Discard,
    /// Ask again for each child.
    Recurse,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Ungenerated,
    Leaf(Arc<Chunk>),
    Internal([u32; 8]),
}

#[derive(Debug)]
pub(crate) struct OctreeNode {
    id: ChunkId,
    lod: u8,
    origin: IVec3,
    kind: NodeKind,
}

impl OctreeNode {
    fn bounds(&self) -> IntBox {
        IntBox::from_min_size(self.origin, IVec3::splat(node_size(self.lod)))
    }
}

/// Node and chunk counts, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live nodes in the arena
    pub nodes: usize,
    /// Leaf chunks currently allocated
    pub leaves: usize,
    /// Leaves holding edited dense arrays
    pub dirty_chunks: usize,
    /// Leaves carrying pending assets
    pub stamped_chunks: usize,
}

/// Sparse octree covering the whole world.
#[derive(Debug)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    free: Vec<u32>,
    depth: u8,
    multiplayer: bool,
}

impl Octree {
    /// Create an octree with an ungenerated root.
    pub fn new(depth: u8, multiplayer: bool) -> Self {
        assert!(depth <= MAX_DEPTH, "octree depth {depth} exceeds {MAX_DEPTH}");
        let origin = world_min(depth);
        let kind = if depth == 0 {
            NodeKind::Leaf(Arc::new(Chunk::new(ChunkId::ROOT, origin, multiplayer)))
        } else {
            NodeKind::Ungenerated
        };
        Self {
            nodes: vec![OctreeNode { id: ChunkId::ROOT, lod: depth, origin, kind }],
            free: Vec::new(),
            depth,
            multiplayer,
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Bounds of the whole world.
    pub fn bounds(&self) -> IntBox {
        self.nodes[ROOT_INDEX as usize].bounds()
    }

    fn alloc(&mut self, node: OctreeNode) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index as usize] = node;
                index
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Allocate all eight children of an ungenerated node.
    fn subdivide(&mut self, index: u32) {
        let (id, lod, origin) = {
            let node = &self.nodes[index as usize];
            debug_assert!(matches!(node.kind, NodeKind::Ungenerated));
            (node.id, node.lod, node.origin)
        };
        debug_assert!(lod > 0, "cannot subdivide a leaf chunk");

        let size = node_size(lod);
        let mut children = [0u32; 8];
        for (i, slot) in children.iter_mut().enumerate() {
            let child_id = id.child(lod, i as u8);
            let child_origin = origin + child_offset(i as u8, size);
            let kind = if lod == 1 {
                NodeKind::Leaf(Arc::new(Chunk::new(child_id, child_origin, self.multiplayer)))
            } else {
                NodeKind::Ungenerated
            };
            *slot = self.alloc(OctreeNode { id: child_id, lod: lod - 1, origin: child_origin, kind });
        }
        self.nodes[index as usize].kind = NodeKind::Internal(children);
    }

    /// Leaves intersecting `region` in increasing id order, or None if some
    /// part of the region still needs subdividing.
    pub(crate) fn leaves_for(&self, region: &IntBox) -> Option<Vec<Arc<Chunk>>> {
        let mut out = Vec::new();
        self.gather(ROOT_INDEX, region, &mut out).then_some(out)
    }

    fn gather(&self, index: u32, region: &IntBox, out: &mut Vec<Arc<Chunk>>) -> bool {
        let node = &self.nodes[index as usize];
        if !node.bounds().intersects(region) {
            return true;
        }
        match &node.kind {
            NodeKind::Leaf(chunk) => {
                out.push(Arc::clone(chunk));
                true
            }
            NodeKind::Internal(children) => children.iter().all(|&c| self.gather(c, region, out)),
            NodeKind::Ungenerated => false,
        }
    }

    /// Leaves intersecting `region` in increasing id order, creating any
    /// missing ones on the way down.
    pub(crate) fn leaves_for_mut(&mut self, region: &IntBox) -> Vec<Arc<Chunk>> {
        let mut out = Vec::new();
        self.gather_mut(ROOT_INDEX, region, &mut out);
        debug_assert!(out.windows(2).all(|w| w[0].id() < w[1].id()));
        out
    }

    fn gather_mut(&mut self, index: u32, region: &IntBox, out: &mut Vec<Arc<Chunk>>) {
        if !self.nodes[index as usize].bounds().intersects(region) {
            return;
        }
        if matches!(self.nodes[index as usize].kind, NodeKind::Ungenerated) {
            self.subdivide(index);
        }
        match &self.nodes[index as usize].kind {
            NodeKind::Leaf(chunk) => out.push(Arc::clone(chunk)),
            NodeKind::Internal(children) => {
                let children = *children;
                for child in children {
                    self.gather_mut(child, region, out);
                }
            }
            NodeKind::Ungenerated => unreachable!("node was just subdivided"),
        }
    }

    /// Existing leaves intersecting `region`, without creating any.
    pub(crate) fn existing_leaves(&self, region: &IntBox) -> Vec<Arc<Chunk>> {
        let mut out = Vec::new();
        self.visit_leaves(ROOT_INDEX, region, &mut |chunk| out.push(Arc::clone(chunk)));
        out
    }

    fn visit_leaves(&self, index: u32, region: &IntBox, f: &mut dyn FnMut(&Arc<Chunk>)) {
        let node = &self.nodes[index as usize];
        if !node.bounds().intersects(region) {
            return;
        }
        match &node.kind {
            NodeKind::Leaf(chunk) => f(chunk),
            NodeKind::Internal(children) => {
                for &child in children {
                    self.visit_leaves(child, region, f);
                }
            }
            NodeKind::Ungenerated => {}
        }
    }

    /// Every allocated leaf in increasing id order.
    pub(crate) fn all_leaves(&self) -> Vec<Arc<Chunk>> {
        self.existing_leaves(&self.bounds())
    }

    /// Walk the tree top-down, pruning content-free chunks wherever the
    /// predicate answers `Discard`. Returns the number of leaves removed.
    pub fn discard_by_predicate(&mut self, predicate: &mut dyn FnMut(&IntBox) -> DiscardAction) -> usize {
        let mut pruned = 0;
        self.discard_node(ROOT_INDEX, predicate, &mut pruned);
        pruned
    }

    fn discard_node(
        &mut self,
        index: u32,
        predicate: &mut dyn FnMut(&IntBox) -> DiscardAction,
        pruned: &mut usize,
    ) -> bool {
        let bounds = self.nodes[index as usize].bounds();
        let action = predicate(&bounds);
        let keep = action == DiscardAction::Keep;
        match action {
            DiscardAction::Keep => {}
            DiscardAction::Discard => {
                self.prune(index, pruned);
            }
            DiscardAction::Recurse => {
                if let NodeKind::Internal(children) = self.nodes[index as usize].kind {
                    let mut kept = false;
                    for child in children {
                        kept |= self.discard_node(child, predicate, pruned);
                    }
                    // A kept child must survive, so the node cannot collapse
                    if !kept && children.iter().all(|&c| self.is_content_free(c)) {
                        self.release_children(index, pruned);
                    }
                }
            }
        }
        keep
    }

    /// Prune a whole subtree. Returns true if nothing in it holds content.
    fn prune(&mut self, index: u32, pruned: &mut usize) -> bool {
        match &self.nodes[index as usize].kind {
            NodeKind::Ungenerated => true,
            NodeKind::Leaf(chunk) => chunk.is_prunable(),
            NodeKind::Internal(children) => {
                let children = *children;
                let mut empty = true;
                for child in children {
                    empty &= self.prune(child, pruned);
                }
                if empty {
                    self.release_children(index, pruned);
                }
                empty
            }
        }
    }

    fn is_content_free(&self, index: u32) -> bool {
        match &self.nodes[index as usize].kind {
            NodeKind::Ungenerated => true,
            NodeKind::Leaf(chunk) => chunk.is_prunable(),
            NodeKind::Internal(_) => false,
        }
    }

    /// Turn an internal node back into an ungenerated one.
    fn release_children(&mut self, index: u32, pruned: &mut usize) {
        let kind = std::mem::replace(&mut self.nodes[index as usize].kind, NodeKind::Ungenerated);
        if let NodeKind::Internal(children) = kind {
            for child in children {
                if matches!(self.nodes[child as usize].kind, NodeKind::Leaf(_)) {
                    *pruned += 1;
                }
                self.release_children(child, pruned);
                self.nodes[child as usize].kind = NodeKind::Ungenerated;
                self.free.push(child);
            }
        }
    }

    /// Count nodes and chunk states.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            nodes: self.nodes.len() - self.free.len(),
            ..Default::default()
        };
        self.visit_leaves(ROOT_INDEX, &self.bounds(), &mut |chunk| {
            stats.leaves += 1;
            stats.dirty_chunks += chunk.is_dirty() as usize;
            stats.stamped_chunks += chunk.is_stamped() as usize;
        });
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::chunk::CHUNK_SIZE;

    #[test]
    fn test_new_root() {
        let tree = Octree::new(2, false);
        assert_eq!(tree.bounds(), IntBox::new(IVec3::splat(-32), IVec3::splat(32)));
        assert_eq!(tree.stats().nodes, 1);
        assert_eq!(tree.stats().leaves, 0);
        assert!(tree.leaves_for(&IntBox::from_point(IVec3::ZERO)).is_none());
    }

    #[test]
    fn test_depth_zero_root_is_leaf() {
        let tree = Octree::new(0, false);
        let leaves = tree.leaves_for(&IntBox::from_point(IVec3::ZERO)).unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id(), ChunkId::ROOT);
    }

    #[test]
    fn test_lazy_subdivision() {
        let mut tree = Octree::new(2, false);
        let leaves = tree.leaves_for_mut(&IntBox::from_point(IVec3::ZERO));
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id(), ChunkId::of_position(IVec3::ZERO, 2));
        // Root + 8 lod-1 nodes + 8 leaves under one of them
        assert_eq!(tree.stats().nodes, 17);
        assert_eq!(tree.stats().leaves, 8);

        // Now readable without subdivision
        assert!(tree.leaves_for(&IntBox::from_point(IVec3::ZERO)).is_some());
    }

    #[test]
    fn test_leaves_sorted_by_id() {
        let mut tree = Octree::new(3, false);
        let region = IntBox::new(IVec3::splat(-10), IVec3::splat(20));
        let leaves = tree.leaves_for_mut(&region);
        assert_eq!(leaves.len(), 27);
        assert!(leaves.windows(2).all(|w| w[0].id() < w[1].id()));
    }

    #[test]
    fn test_discard_everything() {
        let mut tree = Octree::new(3, false);
        tree.leaves_for_mut(&IntBox::new(IVec3::splat(-10), IVec3::splat(20)));
        let pruned = tree.discard_by_predicate(&mut |_| DiscardAction::Discard);
        assert!(pruned > 0);
        assert_eq!(tree.stats(), StoreStats { nodes: 1, ..Default::default() });
    }

    #[test]
    fn test_discard_keeps_admitted_chunk() {
        let mut tree = Octree::new(2, false);
        let leaves = tree.leaves_for_mut(&IntBox::from_point(IVec3::ZERO));
        leaves[0].admit(true);

        tree.discard_by_predicate(&mut |_| DiscardAction::Discard);
        assert_eq!(tree.stats().leaves, 8);

        leaves[0].dismiss(true);
        tree.discard_by_predicate(&mut |_| DiscardAction::Discard);
        assert_eq!(tree.stats().leaves, 0);
    }

    #[test]
    fn test_keep_stops_descent() {
        let mut tree = Octree::new(2, false);
        tree.leaves_for_mut(&IntBox::from_point(IVec3::ZERO));
        let mut calls = 0;
        tree.discard_by_predicate(&mut |_| {
            calls += 1;
            DiscardAction::Keep
        });
        assert_eq!(calls, 1);
        assert_eq!(tree.stats().leaves, 8);
    }

    #[test]
    fn test_kept_children_survive_recursion() {
        let mut tree = Octree::new(2, false);
        tree.leaves_for_mut(&IntBox::from_point(IVec3::ZERO));
        let pruned = tree.discard_by_predicate(&mut |bounds| {
            if bounds.size().x > CHUNK_SIZE {
                DiscardAction::Recurse
            } else {
                DiscardAction::Keep
            }
        });
        assert_eq!(pruned, 0);
        assert_eq!(tree.stats().leaves, 8);

        // Mixed verdicts: one discarded leaf does not collapse kept siblings
        let keep = ChunkId::of_position(IVec3::ZERO, 2);
        tree.discard_by_predicate(&mut |bounds| {
            if bounds.size().x > CHUNK_SIZE {
                DiscardAction::Recurse
            } else if bounds.contains(IVec3::ZERO) {
                DiscardAction::Keep
            } else {
                DiscardAction::Discard
            }
        });
        let leaves = tree.all_leaves();
        assert_eq!(leaves.len(), 8);
        assert!(leaves.iter().any(|c| c.id() == keep));
    }

    #[test]
    fn test_slots_are_reused() {
        let mut tree = Octree::new(2, false);
        tree.leaves_for_mut(&IntBox::from_point(IVec3::ZERO));
        let arena_len = tree.nodes.len();
        tree.discard_by_predicate(&mut |_| DiscardAction::Discard);
        tree.leaves_for_mut(&IntBox::from_point(IVec3::splat(-1)));
        assert_eq!(tree.nodes.len(), arena_len);
    }
}
