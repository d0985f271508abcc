//! Editing tools built on write transactions.
//!
//! Unlike the point accessors, tools clip their footprint to the world, so
//! an edit near the border only touches voxels that exist.

use crate::core::types::{IVec3, Vec3};
use crate::math::IntBox;
use crate::voxel::material::MaterialLayer;
use crate::voxel::store::VoxelStore;
use crate::voxel::transaction::SetTransaction;

/// Open a write transaction over the part of `region` inside the world.
fn begin_clipped(store: &VoxelStore, region: IntBox) -> Option<SetTransaction> {
    let clipped = store.bounds().intersection(&region)?;
    Some(store.begin_set(clipped))
}

/// Add (fill) or remove (carve) a sphere.
///
/// Writes the clamped signed distance to the sphere surface, combined with
/// the existing field so a fill never carves and a carve never fills.
/// Returns every position whose value changed.
pub fn set_value_sphere(store: &VoxelStore, center: IVec3, radius: f32, add: bool) -> Vec<IVec3> {
    let reach = radius.max(0.0).ceil() as i32 + 1;
    let Some(mut transaction) = begin_clipped(store, IntBox::around(center, reach)) else {
        return Vec::new();
    };

    let mut modified = Vec::new();
    for position in transaction.region().iter() {
        let distance = ((position - center).as_vec3().length() - radius).clamp(-1.0, 1.0);
        let current = transaction.value(position);
        let value = if add { current.min(distance) } else { current.max(-distance) };
        if transaction.set_value(position, value) {
            modified.push(position);
        }
    }
    modified
}

/// Fill (value -1) or clear (value 1) a box of `size` voxels at `min`.
pub fn set_value_box(store: &VoxelStore, min: IVec3, size: IVec3, add: bool) -> Vec<IVec3> {
    let Some(mut transaction) = begin_clipped(store, IntBox::from_min_size(min, size)) else {
        return Vec::new();
    };

    let value = if add { -1.0 } else { 1.0 };
    transaction
        .region()
        .iter()
        .filter(|&position| transaction.set_value(position, value))
        .collect()
}

/// Paint `index` into `layer` over a box.
pub fn set_material_box(
    store: &VoxelStore,
    min: IVec3,
    size: IVec3,
    index: u8,
    layer: MaterialLayer,
) -> Vec<IVec3> {
    let Some(mut transaction) = begin_clipped(store, IntBox::from_min_size(min, size)) else {
        return Vec::new();
    };

    let mut modified = Vec::new();
    for position in transaction.region().iter() {
        let material = transaction.material(position).painted(index, layer, 1.0);
        if transaction.set_material(position, material) {
            modified.push(position);
        }
    }
    modified
}

/// Paint `index` into `layer` over a sphere, fading out over
/// `fade_distance` voxels beyond `radius` with the given exponent.
pub fn set_material_sphere(
    store: &VoxelStore,
    center: IVec3,
    radius: f32,
    index: u8,
    layer: MaterialLayer,
    fade_distance: f32,
    exponent: f32,
) -> Vec<IVec3> {
    let fade_distance = fade_distance.max(0.0);
    let reach = (radius + fade_distance).max(0.0).ceil() as i32;
    let Some(mut transaction) = begin_clipped(store, IntBox::around(center, reach)) else {
        return Vec::new();
    };

    let mut modified = Vec::new();
    for position in transaction.region().iter() {
        let distance = (position - center).as_vec3().length();
        let strength = falloff(distance, radius, fade_distance, exponent);
        if strength <= 0.0 {
            continue;
        }
        let material = transaction.material(position).painted(index, layer, strength);
        if transaction.set_material(position, material) {
            modified.push(position);
        }
    }
    modified
}

/// Which voxels [`flatten`] may touch.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlattenOptions {
    /// Leave fully empty voxels (value 1) alone, so flattening never adds
    pub skip_empty: bool,
    /// Leave fully solid voxels (value -1) alone, so flattening never removes
    pub skip_full: bool,
}

/// Pull the field within `radius` of `position` toward the plane through
/// `position` with the given `normal`.
///
/// Each voxel moves `strength` of the way to the clamped signed distance
/// from the plane. Returns every position whose value changed.
pub fn flatten(
    store: &VoxelStore,
    position: Vec3,
    normal: Vec3,
    radius: f32,
    strength: f32,
    options: FlattenOptions,
) -> Vec<IVec3> {
    let normal = normal.normalize_or_zero();
    if normal == Vec3::ZERO {
        return Vec::new();
    }
    let strength = strength.clamp(0.0, 1.0);
    let center = position.round().as_ivec3();
    let reach = radius.max(0.0).ceil() as i32 + 1;
    let Some(mut transaction) = begin_clipped(store, IntBox::around(center, reach)) else {
        return Vec::new();
    };

    let mut modified = Vec::new();
    for voxel in transaction.region().iter() {
        let offset = voxel.as_vec3() - position;
        if offset.length() > radius {
            continue;
        }
        let current = transaction.value(voxel);
        if (options.skip_empty && current >= 1.0) || (options.skip_full && current <= -1.0) {
            continue;
        }
        let target = offset.dot(normal).clamp(-1.0, 1.0);
        let value = current + (target - current) * strength;
        if transaction.set_value(voxel, value) {
            modified.push(voxel);
        }
    }
    modified
}

/// Full strength inside `radius`, then `(1 - d / fade)^exponent` across the fade band.
fn falloff(distance: f32, radius: f32, fade_distance: f32, exponent: f32) -> f32 {
    if distance <= radius {
        1.0
    } else if fade_distance > 0.0 && distance < radius + fade_distance {
        (1.0 - (distance - radius) / fade_distance).powf(exponent)
    } else {
        0.0
    }
}
