//! Truncated signed distance volume.
//!
//! A fixed-resolution voxel grid over an axis-aligned cube anchored at
//! the world origin. Each voxel packs two 16-bit fields into one 32-bit
//! word:
//!
//! ```text
//! bits 0..16   F: truncated signed distance, normalized to [-1, 1]
//!              and scaled by DIVISOR; F = DIVISOR with W = 0 marks
//!              "never observed"
//! bits 16..32  W: observation weight, capped at MAX_WEIGHT
//! ```
//!
//! The flat layout is (z · Y + y) rows by X columns, so the word for
//! voxel (x, y, z) lives at `x + y · X + z · X · Y`. This packing is
//! part of the storage contract and is preserved by the download
//! accessors.

use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Scale between the normalized TSDF in [-1, 1] and the stored i16.
pub const DIVISOR: f32 = 32767.0;

/// Stored F value marking a voxel that has never been observed.
pub const EMPTY_TSDF: i16 = 32767;

/// Maximum accumulated observation weight per voxel.
pub const MAX_WEIGHT: i16 = 128;

const EMPTY_WORD: i32 = EMPTY_TSDF as u16 as i32;

/// Volume grid configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Voxel count per axis; every entry must be a power of two.
    pub resolution: [usize; 3],

    /// Edge lengths of the covered cube, meters.
    pub size: [f32; 3],
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            resolution: [256, 256, 256],
            size: [3.0, 3.0, 3.0],
        }
    }
}

/// Pack a normalized TSDF value and weight into a storage word.
#[inline]
pub fn pack_tsdf(tsdf: f32, weight: i16) -> i32 {
    let f = (tsdf * DIVISOR).round().clamp(-DIVISOR, DIVISOR) as i16;
    ((weight as i32) << 16) | (f as u16 as i32)
}

/// Unpack a storage word into (raw F, weight).
#[inline]
pub fn unpack_tsdf(word: i32) -> (i16, i16) {
    ((word & 0xFFFF) as u16 as i16, (word >> 16) as i16)
}

/// The truncated signed distance volume.
#[derive(Debug, Clone)]
pub struct TsdfVolume {
    resolution: [usize; 3],
    size: Vector3<f32>,
    cell_size: Vector3<f32>,
    data: Vec<i32>,
}

impl TsdfVolume {
    /// Allocate a volume; every voxel starts in the empty state.
    pub fn new(config: &VolumeConfig) -> Self {
        let [x, y, z] = config.resolution;
        let size = Vector3::from(config.size);
        let mut volume = Self {
            resolution: config.resolution,
            size,
            cell_size: Vector3::zeros(),
            data: vec![EMPTY_WORD; x * y * z],
        };
        volume.update_cell_size();
        volume
    }

    fn update_cell_size(&mut self) {
        self.cell_size = Vector3::new(
            self.size.x / self.resolution[0] as f32,
            self.size.y / self.resolution[1] as f32,
            self.size.z / self.resolution[2] as f32,
        );
    }

    /// Voxel count per axis.
    #[inline]
    pub fn resolution(&self) -> [usize; 3] {
        self.resolution
    }

    /// Physical edge lengths, meters.
    #[inline]
    pub fn size(&self) -> Vector3<f32> {
        self.size
    }

    /// Voxel edge lengths, meters.
    #[inline]
    pub fn cell_size(&self) -> Vector3<f32> {
        self.cell_size
    }

    /// Change the physical extent of the cube. Voxel data is kept.
    pub fn set_size(&mut self, size: Vector3<f32>) {
        self.size = size;
        self.update_cell_size();
    }

    /// Smallest truncation distance supported by this grid.
    #[inline]
    pub fn min_truncation(&self) -> f32 {
        2.1 * self.cell_size.x.max(self.cell_size.y).max(self.cell_size.z)
    }

    /// Reset every voxel to the empty state.
    pub fn clear(&mut self) {
        self.data.par_iter_mut().for_each(|w| *w = EMPTY_WORD);
    }

    /// Flat index of voxel (x, y, z).
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.resolution[0] + z * self.resolution[0] * self.resolution[1]
    }

    /// Raw storage word of voxel (x, y, z).
    #[inline]
    pub fn word(&self, x: usize, y: usize, z: usize) -> i32 {
        self.data[self.index(x, y, z)]
    }

    /// Normalized TSDF and weight of voxel (x, y, z).
    #[inline]
    pub fn tsdf_at(&self, x: usize, y: usize, z: usize) -> (f32, i16) {
        let (f, w) = unpack_tsdf(self.word(x, y, z));
        (f as f32 / DIVISOR, w)
    }

    /// World coordinates of the center of voxel (x, y, z).
    #[inline]
    pub fn voxel_center(&self, x: usize, y: usize, z: usize) -> Vector3<f32> {
        Vector3::new(
            (x as f32 + 0.5) * self.cell_size.x,
            (y as f32 + 0.5) * self.cell_size.y,
            (z as f32 + 0.5) * self.cell_size.z,
        )
    }

    /// Flat read-only view of the packed words.
    #[inline]
    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    /// Flat mutable view of the packed words.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [i32] {
        &mut self.data
    }

    /// Trilinearly interpolated normalized TSDF at a world point.
    ///
    /// Unobserved voxels are excluded and the remaining corner weights
    /// renormalized, so samples near the observation boundary stay
    /// usable. Returns `None` when the point is outside the
    /// interpolation lattice or no surrounding voxel has been observed.
    pub fn interpolate(&self, p: &Vector3<f32>) -> Option<f32> {
        let gx = p.x / self.cell_size.x - 0.5;
        let gy = p.y / self.cell_size.y - 0.5;
        let gz = p.z / self.cell_size.z - 0.5;
        if gx < 0.0 || gy < 0.0 || gz < 0.0 {
            return None;
        }
        let x0 = gx as usize;
        let y0 = gy as usize;
        let z0 = gz as usize;
        if x0 + 1 >= self.resolution[0] || y0 + 1 >= self.resolution[1] || z0 + 1 >= self.resolution[2]
        {
            return None;
        }
        let fx = gx - x0 as f32;
        let fy = gy - y0 as f32;
        let fz = gz - z0 as f32;

        let mut value = 0.0f32;
        let mut weight = 0.0f32;
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    let (f, w) = unpack_tsdf(self.word(x0 + dx, y0 + dy, z0 + dz));
                    if w <= 0 {
                        continue;
                    }
                    let wx = if dx == 0 { 1.0 - fx } else { fx };
                    let wy = if dy == 0 { 1.0 - fy } else { fy };
                    let wz = if dz == 0 { 1.0 - fz } else { fz };
                    let c = wx * wy * wz;
                    value += f as f32 / DIVISOR * c;
                    weight += c;
                }
            }
        }
        (weight > 1e-6).then(|| value / weight)
    }

    /// TSDF gradient at a world point by central differences of the
    /// trilinear interpolant, half a cell apart per axis.
    ///
    /// The raycaster and the extraction readers share this exact
    /// formula so their normals agree.
    pub fn gradient(&self, p: &Vector3<f32>) -> Option<Vector3<f32>> {
        let mut g = Vector3::zeros();
        for axis in 0..3 {
            let mut shift = Vector3::zeros();
            shift[axis] = 0.5 * self.cell_size[axis];
            let f1 = self.interpolate(&(p + shift))?;
            let f0 = self.interpolate(&(p - shift))?;
            g[axis] = (f1 - f0) / self.cell_size[axis];
        }
        Some(g)
    }

    /// Download the volume as normalized F values (F / DIVISOR).
    pub fn download_tsdf(&self) -> Vec<f32> {
        self.data
            .par_iter()
            .map(|&word| unpack_tsdf(word).0 as f32 / DIVISOR)
            .collect()
    }

    /// Download normalized F values and weights in one pass.
    pub fn download_tsdf_and_weights(&self) -> (Vec<f32>, Vec<i16>) {
        self.data
            .par_iter()
            .map(|&word| {
                let (f, w) = unpack_tsdf(word);
                (f as f32 / DIVISOR, w)
            })
            .unzip()
    }
}
