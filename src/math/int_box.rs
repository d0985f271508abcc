//! Half-open integer box in voxel space

use crate::core::types::IVec3;

/// Integer box covering `min..max` on every axis (max exclusive).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IntBox {
    pub min: IVec3,
    pub max: IVec3,
}

impl IntBox {
    /// Create a box from min (inclusive) and max (exclusive) corners.
    ///
    /// # Panics
    /// If any extent is zero or negative.
    pub fn new(min: IVec3, max: IVec3) -> Self {
        let b = Self { min, max };
        assert!(b.is_valid(), "malformed region: min {min} max {max}");
        b
    }

    /// Box containing a single voxel.
    pub fn from_point(p: IVec3) -> Self {
        Self { min: p, max: p + IVec3::ONE }
    }

    /// Box of `size` voxels starting at `min`.
    pub fn from_min_size(min: IVec3, size: IVec3) -> Self {
        Self::new(min, min + size)
    }

    /// Box covering every voxel within `radius` of `center` (inclusive).
    pub fn around(center: IVec3, radius: i32) -> Self {
        Self::new(center - IVec3::splat(radius), center + IVec3::splat(radius + 1))
    }

    /// True when every extent is positive.
    pub fn is_valid(&self) -> bool {
        self.max.cmpgt(self.min).all()
    }

    pub fn size(&self) -> IVec3 {
        self.max - self.min
    }

    /// Number of voxels inside.
    pub fn volume(&self) -> i64 {
        let s = self.size();
        s.x as i64 * s.y as i64 * s.z as i64
    }

    pub fn contains(&self, p: IVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains_box(&self, other: &IntBox) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Check if two boxes share at least one voxel.
    pub fn intersects(&self, other: &IntBox) -> bool {
        self.min.cmplt(other.max).all() && other.min.cmplt(self.max).all()
    }

    /// Overlap of two boxes, if any.
    pub fn intersection(&self, other: &IntBox) -> Option<IntBox> {
        let b = IntBox {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        };
        b.is_valid().then_some(b)
    }

    /// The eight extreme voxels of the box (max corner is inclusive here).
    pub fn corners(&self) -> [IVec3; 8] {
        let hi = self.max - IVec3::ONE;
        let mut out = [IVec3::ZERO; 8];
        for (i, c) in out.iter_mut().enumerate() {
            *c = IVec3::new(
                if i & 1 != 0 { hi.x } else { self.min.x },
                if i & 2 != 0 { hi.y } else { self.min.y },
                if i & 4 != 0 { hi.z } else { self.min.z },
            );
        }
        out
    }

    /// Iterate every voxel, x fastest.
    pub fn iter(&self) -> impl Iterator<Item = IVec3> + use<> {
        let (min, max) = (self.min, self.max);
        (min.z..max.z).flat_map(move |z| {
            (min.y..max.y).flat_map(move |y| (min.x..max.x).map(move |x| IVec3::new(x, y, z)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_and_volume() {
        let b = IntBox::new(IVec3::ZERO, IVec3::new(2, 3, 4));
        assert_eq!(b.size(), IVec3::new(2, 3, 4));
        assert_eq!(b.volume(), 24);
        assert_eq!(b.iter().count(), 24);
    }

    #[test]
    fn test_contains_is_half_open() {
        let b = IntBox::new(IVec3::ZERO, IVec3::ONE * 4);
        assert!(b.contains(IVec3::ZERO));
        assert!(b.contains(IVec3::splat(3)));
        assert!(!b.contains(IVec3::splat(4)));
        assert!(!b.contains(IVec3::new(-1, 0, 0)));
    }

    #[test]
    fn test_intersects() {
        let a = IntBox::new(IVec3::ZERO, IVec3::splat(4));
        let touching = IntBox::new(IVec3::new(4, 0, 0), IVec3::new(8, 4, 4));
        let overlapping = IntBox::new(IVec3::splat(3), IVec3::splat(6));
        assert!(!a.intersects(&touching));
        assert!(a.intersects(&overlapping));
        assert_eq!(
            a.intersection(&overlapping),
            Some(IntBox::new(IVec3::splat(3), IVec3::splat(4)))
        );
        assert_eq!(a.intersection(&touching), None);
    }

    #[test]
    fn test_corners() {
        let b = IntBox::new(IVec3::ZERO, IVec3::splat(2));
        let corners = b.corners();
        assert_eq!(corners[0], IVec3::ZERO);
        assert_eq!(corners[7], IVec3::ONE);
    }

    #[test]
    #[should_panic(expected = "malformed region")]
    fn test_zero_extent_panics() {
        IntBox::new(IVec3::ZERO, IVec3::new(0, 1, 1));
    }
}
