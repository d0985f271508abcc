//! Asset instances: bounded prefabs stamped over the world.

use crate::core::types::IVec3;
use crate::math::IntBox;
use crate::voxel::material::VoxelMaterial;

/// How an asset combines with the values underneath it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AssetMode {
    /// Union with the existing field: the more solid value wins.
    Additive,
    /// Replace value and material everywhere inside the bounds.
    Destructive,
}

/// Immutable grid of override values and materials placed in world space.
///
/// Shared between the stamping caller and every chunk it overlaps; chunks
/// consult it at read time until they are materialized.
#[derive(Clone, Debug)]
pub struct AssetInstance {
    bounds: IntBox,
    values: Vec<f32>,
    materials: Vec<VoxelMaterial>,
    mode: AssetMode,
}

impl AssetInstance {
    /// Build an asset from dense arrays laid out x-fastest over `bounds`.
    ///
    /// # Panics
    /// If the arrays do not match the bounds volume.
    pub fn new(
        bounds: IntBox,
        values: Vec<f32>,
        materials: Vec<VoxelMaterial>,
        mode: AssetMode,
    ) -> Self {
        let volume = bounds.volume() as usize;
        assert_eq!(values.len(), volume, "asset values do not cover its bounds");
        assert_eq!(materials.len(), volume, "asset materials do not cover its bounds");
        Self { bounds, values, materials, mode }
    }

    /// Build an asset by sampling a closure over `bounds`.
    pub fn from_fn(
        bounds: IntBox,
        mode: AssetMode,
        mut f: impl FnMut(IVec3) -> (f32, VoxelMaterial),
    ) -> Self {
        let (values, materials) = bounds.iter().map(&mut f).unzip();
        Self::new(bounds, values, materials, mode)
    }

    pub fn bounds(&self) -> IntBox {
        self.bounds
    }

    pub fn mode(&self) -> AssetMode {
        self.mode
    }

    /// Stored override at a world position, if inside the bounds.
    pub fn sample(&self, position: IVec3) -> Option<(f32, VoxelMaterial)> {
        if !self.bounds.contains(position) {
            return None;
        }
        let local = position - self.bounds.min;
        let size = self.bounds.size();
        let index = (local.x + size.x * (local.y + size.y * local.z)) as usize;
        Some((self.values[index], self.materials[index]))
    }

    /// Compose this asset over an existing value/material.
    pub fn apply(&self, position: IVec3, value: f32, material: VoxelMaterial) -> (f32, VoxelMaterial) {
        match self.sample(position) {
            None => (value, material),
            Some((asset_value, asset_material)) => match self.mode {
                AssetMode::Destructive => (asset_value, asset_material),
                AssetMode::Additive => {
                    if asset_value < value {
                        (asset_value, asset_material)
                    } else {
                        (value, material)
                    }
                }
            },
        }
    }
}
