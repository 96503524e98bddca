//! Per-voxel color accumulation.
//!
//! Shares the TSDF grid layout; each voxel packs an RGB triple and an
//! independent observation weight into one 32-bit word as (R, G, B, W)
//! bytes. The color weight cap is runtime-configurable, unlike the
//! compile-time TSDF weight cap.

use nalgebra::Vector3;
use rayon::prelude::*;

/// Pack RGB and weight bytes into a storage word.
#[inline]
pub fn pack_color(rgb: [u8; 3], weight: u8) -> u32 {
    (rgb[0] as u32) | ((rgb[1] as u32) << 8) | ((rgb[2] as u32) << 16) | ((weight as u32) << 24)
}

/// Unpack a storage word into (RGB, weight).
#[inline]
pub fn unpack_color(word: u32) -> ([u8; 3], u8) {
    (
        [word as u8, (word >> 8) as u8, (word >> 16) as u8],
        (word >> 24) as u8,
    )
}

/// Color accumulation volume.
#[derive(Debug, Clone)]
pub struct ColorVolume {
    resolution: [usize; 3],
    cell_size: Vector3<f32>,
    max_weight: u8,
    data: Vec<u32>,
}

impl ColorVolume {
    /// Allocate a cleared color volume matching the TSDF grid.
    pub fn new(resolution: [usize; 3], size: Vector3<f32>, max_weight: u8) -> Self {
        let [x, y, z] = resolution;
        Self {
            resolution,
            cell_size: Vector3::new(
                size.x / x as f32,
                size.y / y as f32,
                size.z / z as f32,
            ),
            max_weight,
            data: vec![0; x * y * z],
        }
    }

    /// Weight cap for the running color average.
    #[inline]
    pub fn max_weight(&self) -> u8 {
        self.max_weight
    }

    /// Replace the weight cap.
    pub fn set_max_weight(&mut self, max_weight: u8) {
        self.max_weight = max_weight;
    }

    /// Track a change of the physical volume extent.
    pub fn set_size(&mut self, size: Vector3<f32>) {
        self.cell_size = Vector3::new(
            size.x / self.resolution[0] as f32,
            size.y / self.resolution[1] as f32,
            size.z / self.resolution[2] as f32,
        );
    }

    /// Reset all voxels to black with zero weight.
    pub fn clear(&mut self) {
        self.data.par_iter_mut().for_each(|w| *w = 0);
    }

    /// Flat index of voxel (x, y, z).
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.resolution[0] + z * self.resolution[0] * self.resolution[1]
    }

    /// Flat mutable view of the packed words.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        &mut self.data
    }

    /// Trilinearly interpolated RGB at a world point.
    ///
    /// Returns `None` outside the interpolation lattice; unobserved
    /// voxels contribute their stored (black) value, mirroring the
    /// behavior of the extraction path.
    pub fn interpolate_rgb(&self, p: &Vector3<f32>) -> Option<[f32; 3]> {
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

        let mut rgb = [0.0f32; 3];
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    let (c, _) = unpack_color(self.data[self.index(x0 + dx, y0 + dy, z0 + dz)]);
                    let wx = if dx == 0 { 1.0 - fx } else { fx };
                    let wy = if dy == 0 { 1.0 - fy } else { fy };
                    let wz = if dz == 0 { 1.0 - fz } else { fz };
                    let w = wx * wy * wz;
                    for ch in 0..3 {
                        rgb[ch] += c[ch] as f32 * w;
                    }
                }
            }
        }
        Some(rgb)
    }
}
