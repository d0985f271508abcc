//! Read-only field queries: surface intersection, gradient and inside tests.

use crate::core::types::{IVec3, Vec3};
use crate::math::IntBox;
use crate::voxel::store::VoxelStore;

/// Where an axis-aligned segment crosses the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceHit {
    /// Interpolated crossing point
    pub position: Vec3,
    /// Last lattice point before the crossing
    pub voxel: IVec3,
    /// Crossing fraction between `voxel` and the next lattice point
    pub t: f32,
}

impl VoxelStore {
    /// First sign change of the value field walking from `start` to `end`.
    ///
    /// # Panics
    /// If the segment does not vary along exactly one axis, or leaves the world.
    pub fn intersection(&self, start: IVec3, end: IVec3) -> Option<SurfaceHit> {
        let delta = end - start;
        let varying = delta.cmpne(IVec3::ZERO).bitmask().count_ones();
        assert!(
            varying == 1,
            "intersection segment {start} -> {end} must vary along exactly one axis"
        );

        let step = delta.signum();
        let steps = delta.abs().max_element();
        let transaction = self.begin_get(IntBox::new(start.min(end), start.max(end) + IVec3::ONE));

        let mut previous = transaction.value(start);
        for i in 1..=steps {
            let voxel = start + step * (i - 1);
            let value = transaction.value(voxel + step);
            if (previous > 0.0) != (value > 0.0) {
                let t = previous / (previous - value);
                return Some(SurfaceHit {
                    position: voxel.as_vec3() + step.as_vec3() * t,
                    voxel,
                    t,
                });
            }
            previous = value;
        }
        None
    }

    /// Central-difference gradient of the value field, averaged over the
    /// 26 neighbours of `position`.
    ///
    /// # Panics
    /// If any neighbour lies outside the world.
    pub fn gradient(&self, position: IVec3) -> Vec3 {
        let transaction = self.begin_get(IntBox::around(position, 1));
        let mut sum = Vec3::ZERO;
        for offset in IntBox::around(IVec3::ZERO, 1).iter() {
            if offset == IVec3::ZERO {
                continue;
            }
            sum += offset.as_vec3() * transaction.value(position + offset);
        }
        // Each axis sees 18 neighbours with a unit offset along it
        sum / 18.0
    }

    /// Outward surface normal (normalized gradient), or zero on a flat field.
    pub fn normal(&self, position: IVec3) -> Vec3 {
        self.gradient(position).normalize_or_zero()
    }

    /// True if any of the 8 lattice points around `position` is solid
    /// (value `<= 0`).
    ///
    /// # Panics
    /// If any of those lattice points lies outside the world.
    pub fn is_inside(&self, position: Vec3) -> bool {
        let min = position.floor().as_ivec3();
        let cell = IntBox::new(min, min + IVec3::splat(2));
        let transaction = self.begin_get(cell);
        cell.iter().any(|p| transaction.value(p) <= 0.0)
    }
}
