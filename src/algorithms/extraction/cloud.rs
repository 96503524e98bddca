//! Point cloud extraction from the TSDF volume.
//!
//! Surface points are found at sign changes of F between neighboring
//! observed voxels and placed by sign-weighted interpolation of the two
//! voxel centers. The forward half of the neighborhood is scanned so
//! each crossing is emitted once per originating voxel.

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::algorithms::fusion::{unpack_tsdf, ColorVolume, TsdfVolume, EMPTY_TSDF};
use crate::core::types::invalid_map_pixel;

/// Maximum number of points produced by the parallel extractor.
const CLOUD_BUFFER_SIZE: usize = 10_000_000;

#[inline]
fn read_voxel(volume: &TsdfVolume, x: usize, y: usize, z: usize) -> Option<i32> {
    let (f, w) = unpack_tsdf(volume.word(x, y, z));
    if w == 0 || f == EMPTY_TSDF {
        None
    } else {
        Some(f as i32)
    }
}

#[inline]
fn interpolate_crossing(
    volume: &TsdfVolume,
    f: i32,
    x: usize,
    y: usize,
    z: usize,
    fn_: i32,
    xn: usize,
    yn: usize,
    zn: usize,
) -> Vector3<f32> {
    let v = volume.voxel_center(x, y, z);
    let vn = volume.voxel_center(xn, yn, zn);
    let fa = f.abs() as f32;
    let fna = fn_.abs() as f32;
    (v * fna + vn * fa) / (fa + fna)
}

/// Scan one voxel's forward neighborhood, appending surface points.
fn emit_points(
    volume: &TsdfVolume,
    x: usize,
    y: usize,
    z: usize,
    connected26: bool,
    out: &mut Vec<Vector3<f32>>,
) {
    let Some(f) = read_voxel(volume, x, y, z) else {
        return;
    };

    let visit = |dx: i64, dy: i64, dz: i64, out: &mut Vec<Vector3<f32>>| {
        let xn = (x as i64 + dx) as usize;
        let yn = (y as i64 + dy) as usize;
        let zn = (z as i64 + dz) as usize;
        let Some(fn_) = read_voxel(volume, xn, yn, zn) else {
            return;
        };
        if (f > 0 && fn_ < 0) || (f < 0 && fn_ > 0) {
            out.push(interpolate_crossing(volume, f, x, y, z, fn_, xn, yn, zn));
        }
    };

    if connected26 {
        for dy in -1..2 {
            for dx in -1..2 {
                visit(dx, dy, 1, out);
            }
        }
        for dy in 0..2 {
            for dx in -1..dy * 2 {
                visit(dx, dy, 0, out);
            }
        }
    } else {
        visit(1, 0, 0, out);
        visit(0, 1, 0, out);
        visit(0, 0, 1, out);
    }
}

/// Extract the surface cloud by a sequential scan of the volume.
///
/// With `connected26` the forward half of the 26-neighborhood (13
/// neighbors) is inspected per voxel; otherwise only the three
/// axis-aligned forward neighbors.
pub fn extract_cloud_host(volume: &TsdfVolume, connected26: bool) -> Vec<Vector3<f32>> {
    let [res_x, res_y, res_z] = volume.resolution();
    let mut cloud = Vec::with_capacity(10_000);

    for x in 1..res_x - 1 {
        for y in 1..res_y - 1 {
            for z in 0..res_z - 1 {
                emit_points(volume, x, y, z, connected26, &mut cloud);
            }
        }
    }
    cloud
}

/// Parallel surface extraction into a contiguous buffer.
///
/// Semantically equivalent to [`extract_cloud_host`] with axis-aligned
/// connectivity; the result is truncated at the fixed buffer capacity.
pub fn extract_cloud(volume: &TsdfVolume) -> Vec<Vector3<f32>> {
    let [res_x, res_y, res_z] = volume.resolution();

    let mut cloud: Vec<Vector3<f32>> = (0..res_z - 1)
        .into_par_iter()
        .flat_map_iter(|z| {
            let mut slice_points = Vec::new();
            for x in 1..res_x - 1 {
                for y in 1..res_y - 1 {
                    emit_points(volume, x, y, z, false, &mut slice_points);
                }
            }
            slice_points
        })
        .collect();

    cloud.truncate(CLOUD_BUFFER_SIZE);
    cloud
}

/// Surface normals for an extracted cloud from the TSDF gradient.
///
/// Uses the same central-difference formula as the raycaster, so
/// extracted normals agree with shaded normals. Points where the
/// gradient is unavailable get NaN.
pub fn extract_normals(volume: &TsdfVolume, cloud: &[Vector3<f32>]) -> Vec<Vector3<f32>> {
    cloud
        .par_iter()
        .map(|p| {
            volume
                .gradient(p)
                .and_then(|g| g.try_normalize(1e-12))
                .unwrap_or_else(invalid_map_pixel)
        })
        .collect()
}

/// Colors for an extracted cloud by trilinear sampling of the color
/// volume. Points outside the lattice come out black.
pub fn extract_colors(colors: &ColorVolume, cloud: &[Vector3<f32>]) -> Vec<[u8; 3]> {
    cloud
        .par_iter()
        .map(|p| match colors.interpolate_rgb(p) {
            Some(rgb) => [
                rgb[0].round() as u8,
                rgb[1].round() as u8,
                rgb[2].round() as u8,
            ],
            None => [0, 0, 0],
        })
        .collect()
}
