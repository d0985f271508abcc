//! Voxel material descriptor

use bytemuck::{Pod, Zeroable};
use rkyv::{Archive, Deserialize, Serialize};

/// Which material slot an edit writes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MaterialLayer {
    /// Primary index; the blend weight is pulled back towards it.
    #[default]
    Primary,
    /// Secondary index; the blend weight is pushed towards it.
    Secondary,
}

/// Material of a single voxel - exactly 4 bytes.
///
/// Two material indices blended by `alpha` (0 = fully primary,
/// 255 = fully secondary).
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable,
    Archive, Deserialize, Serialize, serde::Serialize, serde::Deserialize,
)]
pub struct VoxelMaterial {
    /// Primary material index
    pub index_a: u8,
    /// Secondary material index
    pub index_b: u8,
    /// Blend weight towards `index_b`
    pub alpha: u8,
    /// Reserved for gameplay flags
    pub flags: u8,
}

impl VoxelMaterial {
    /// Default material (index 0, no blend)
    pub const DEFAULT: VoxelMaterial = VoxelMaterial {
        index_a: 0,
        index_b: 0,
        alpha: 0,
        flags: 0,
    };

    /// Single unblended material.
    pub fn new(index: u8) -> Self {
        Self { index_a: index, ..Self::DEFAULT }
    }

    /// Two materials with an explicit blend weight.
    pub fn blended(index_a: u8, index_b: u8, alpha: u8) -> Self {
        Self { index_a, index_b, alpha, flags: 0 }
    }

    /// Index that dominates the blend.
    pub fn dominant_index(&self) -> u8 {
        if self.alpha > 127 { self.index_b } else { self.index_a }
    }

    /// Write `index` into `layer`, moving the blend weight by `strength` (0..=1).
    pub fn painted(self, index: u8, layer: MaterialLayer, strength: f32) -> Self {
        let strength = strength.clamp(0.0, 1.0);
        match layer {
            MaterialLayer::Primary => {
                let alpha = (self.alpha as f32 * (1.0 - strength)).round() as u8;
                Self { index_a: index, alpha, ..self }
            }
            MaterialLayer::Secondary => {
                let target = 255.0 * strength;
                let alpha = (self.alpha as f32).max(target).round() as u8;
                Self { index_b: index, alpha, ..self }
            }
        }
    }
}
