//! World generators: the procedural fallback for unedited voxels.

use std::sync::Arc;

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::core::types::IVec3;
use crate::voxel::material::VoxelMaterial;

/// Procedural source of density and material.
///
/// Implementations must be deterministic and side-effect free; the store
/// calls them concurrently from every worker thread without locking.
/// Negative values are inside the terrain, positive values are outside.
pub trait WorldGenerator: Send + Sync {
    /// Density and material at a voxel position.
    fn evaluate(&self, position: IVec3) -> (f32, VoxelMaterial);

    /// Density only.
    fn value(&self, position: IVec3) -> f32 {
        self.evaluate(position).0
    }

    /// Material only.
    fn material(&self, position: IVec3) -> VoxelMaterial {
        self.evaluate(position).1
    }
}

/// Horizontal ground plane.
#[derive(Clone, Debug)]
pub struct FlatGenerator {
    /// Surface height in voxels
    pub height: i32,
    /// Material of every voxel
    pub material: VoxelMaterial,
}

impl FlatGenerator {
    pub fn new(height: i32, material: VoxelMaterial) -> Self {
        Self { height, material }
    }
}

impl WorldGenerator for FlatGenerator {
    fn evaluate(&self, position: IVec3) -> (f32, VoxelMaterial) {
        let value = ((position.y - self.height) as f32).clamp(-1.0, 1.0);
        (value, self.material)
    }
}

/// Solid ball around the origin.
#[derive(Clone, Debug)]
pub struct SphereGenerator {
    pub radius: f32,
    pub material: VoxelMaterial,
}

impl SphereGenerator {
    pub fn new(radius: f32, material: VoxelMaterial) -> Self {
        Self { radius, material }
    }
}

impl WorldGenerator for SphereGenerator {
    fn evaluate(&self, position: IVec3) -> (f32, VoxelMaterial) {
        let value = (position.as_vec3().length() - self.radius).clamp(-1.0, 1.0);
        (value, self.material)
    }
}

/// Parameters controlling terrain generation
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale in voxels (larger = smoother)
    pub height_scale: f32, // Vertical amplitude in voxels
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
    pub stone_depth: f32,  // Depth below the surface where stone replaces soil
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 100.0,
            height_scale: 32.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            stone_depth: 4.0,
        }
    }
}

/// Material indices used by [`NoiseTerrainGenerator`].
pub mod terrain_materials {
    pub const SOIL: u8 = 1;
    pub const STONE: u8 = 2;
}

/// Heightfield terrain using fractal Brownian motion (FBM)
pub struct NoiseTerrainGenerator {
    params: TerrainParams,
    noise: Fbm<Perlin>,
}

impl NoiseTerrainGenerator {
    /// Create a new terrain generator with the given parameters
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Self { params, noise }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Surface height at column (x, z), centered on y = 0
    pub fn height_at(&self, x: i32, z: i32) -> f32 {
        let nx = (x as f32 / self.params.scale) as f64;
        let nz = (z as f32 / self.params.scale) as f64;

        // Noise value in [-1, 1]
        let noise_value = self.noise.get([nx, nz]);
        (noise_value * self.params.height_scale as f64) as f32
    }
}

impl WorldGenerator for NoiseTerrainGenerator {
    fn evaluate(&self, position: IVec3) -> (f32, VoxelMaterial) {
        let height = self.height_at(position.x, position.z);
        let distance = position.y as f32 - height;
        let index = if distance < -self.params.stone_depth {
            terrain_materials::STONE
        } else {
            terrain_materials::SOIL
        };
        (distance.clamp(-1.0, 1.0), VoxelMaterial::new(index))
    }
}

/// Blends two generators: `inside` within the sphere, `outside` beyond it.
pub struct SphereSwapGenerator {
    inside: Arc<dyn WorldGenerator>,
    outside: Arc<dyn WorldGenerator>,
    center: IVec3,
    radius: f32,
}

impl SphereSwapGenerator {
    pub fn new(
        inside: Arc<dyn WorldGenerator>,
        outside: Arc<dyn WorldGenerator>,
        center: IVec3,
        radius: f32,
    ) -> Self {
        Self { inside, outside, center, radius }
    }

    /// Strictly inside the sphere.
    pub fn is_inside(&self, position: IVec3) -> bool {
        is_inside_sphere(position, self.center, self.radius)
    }
}

impl WorldGenerator for SphereSwapGenerator {
    fn evaluate(&self, position: IVec3) -> (f32, VoxelMaterial) {
        if self.is_inside(position) {
            self.inside.evaluate(position)
        } else {
            self.outside.evaluate(position)
        }
    }
}

pub(crate) fn is_inside_sphere(position: IVec3, center: IVec3, radius: f32) -> bool {
    (position - center).as_vec3().length() < radius
}
