//! Depth (and color) integration into the volumes.
//!
//! Every voxel is projectively associated with the *raw* depth frame:
//! the voxel center is transformed into the camera, projected, and
//! compared against the measured range along that pixel's ray. The
//! signed difference, normalized by the truncation distance and capped
//! at +1, updates the voxel's running weighted average.

use nalgebra::Vector3;
use rayon::prelude::*;

use super::color_volume::{pack_color, unpack_color, ColorVolume};
use super::tsdf_volume::{pack_tsdf, unpack_tsdf, TsdfVolume, DIVISOR, MAX_WEIGHT};
use crate::core::types::{
    map_pixel_valid, CameraPose, ColorImage, DepthImage, Intrinsics, MapImage, ScaledDepthImage,
};

/// Convert raw millimeter depth to meters measured along each pixel ray.
///
/// The depth sensor reports the z coordinate; the integrator compares
/// against the Euclidean distance from the camera center, so each pixel
/// is scaled by the length of its unit-depth ray.
pub fn scale_depth(depth: &DepthImage, intr: &Intrinsics, out: &mut ScaledDepthImage) {
    assert_eq!(depth.rows(), out.rows());
    assert_eq!(depth.cols(), out.cols());
    let cols = depth.cols();

    out.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let d = depth.at(row, col);
                *out = if d > 0 {
                    let lambda = intr.ray_direction(col as f32, row as f32).norm();
                    d as f32 * 1e-3 * lambda
                } else {
                    0.0
                };
            }
        });
}

/// Fuse one scaled depth frame into the TSDF volume at `pose`.
///
/// Voxels behind the camera, outside the image interior, or without a
/// depth measurement are untouched. A voxel projecting exactly onto the
/// image border counts as outside.
pub fn integrate(
    volume: &mut TsdfVolume,
    scaled_depth: &ScaledDepthImage,
    intr: &Intrinsics,
    pose: &CameraPose,
    truncation: f32,
) {
    let [res_x, res_y, res_z] = volume.resolution();
    let cell = volume.cell_size();
    let rot_inv = pose.rotation.inverse();
    let translation = pose.translation;
    let rows = scaled_depth.rows() as i32;
    let cols = scaled_depth.cols() as i32;
    let inv_trunc = 1.0 / truncation;

    // Camera-frame step for one voxel along +X; the inner loop walks it
    // incrementally instead of re-transforming every center.
    let step_x = rot_inv * Vector3::new(cell.x, 0.0, 0.0);

    volume
        .as_mut_slice()
        .par_chunks_mut(res_x * res_y)
        .enumerate()
        .for_each(|(z, slice)| {
            for y in 0..res_y {
                let start = Vector3::new(
                    0.5 * cell.x,
                    (y as f32 + 0.5) * cell.y,
                    (z as f32 + 0.5) * cell.z,
                );
                let mut v_cam = rot_inv * (start - translation);

                for x in 0..res_x {
                    let current = v_cam;
                    v_cam += step_x;

                    if current.z <= 0.0 {
                        continue;
                    }
                    let (u, v) = intr.project(&current);
                    let px = u.round() as i32;
                    let py = v.round() as i32;
                    if px <= 0 || py <= 0 || px >= cols - 1 || py >= rows - 1 {
                        continue;
                    }
                    let d = scaled_depth.at(py as usize, px as usize);
                    if d == 0.0 {
                        continue;
                    }
                    let sdf = d - current.norm();
                    if sdf < -truncation {
                        continue;
                    }

                    let f_new = (sdf * inv_trunc).min(1.0);
                    let word = &mut slice[x + y * res_x];
                    let (f, w) = unpack_tsdf(*word);
                    let f_prev = if w > 0 { f as f32 / DIVISOR } else { 0.0 };
                    let w_f = w as f32;
                    let fused = (w_f * f_prev + f_new) / (w_f + 1.0);
                    let w_next = (w + 1).min(MAX_WEIGHT);
                    *word = pack_tsdf(fused, w_next);
                }
            }
        });
}

/// Fuse one color frame into the color volume.
///
/// Only voxels lying within `truncation` of the raycast surface
/// prediction at their projected pixel are updated, so color stays
/// confined to a band around the reconstructed surface.
#[allow(clippy::too_many_arguments)]
pub fn update_color(
    colors: &mut ColorVolume,
    geometry: &TsdfVolume,
    intr: &Intrinsics,
    pose: &CameraPose,
    surface: &MapImage,
    frame: &ColorImage,
    truncation: f32,
) {
    let [res_x, res_y, _] = geometry.resolution();
    let rot_inv = pose.rotation.inverse();
    let translation = pose.translation;
    let rows = frame.rows() as i32;
    let cols = frame.cols() as i32;
    let max_weight = colors.max_weight();

    colors
        .as_mut_slice()
        .par_chunks_mut(res_x * res_y)
        .enumerate()
        .for_each(|(z, slice)| {
            for y in 0..res_y {
                for x in 0..res_x {
                    let v_g = geometry.voxel_center(x, y, z);
                    let v_cam = rot_inv * (v_g - translation);
                    if v_cam.z <= 0.0 {
                        continue;
                    }
                    let (u, v) = intr.project(&v_cam);
                    let px = u.round() as i32;
                    let py = v.round() as i32;
                    if px < 0 || py < 0 || px >= cols || py >= rows {
                        continue;
                    }

                    let predicted = surface.at(py as usize, px as usize);
                    if !map_pixel_valid(&predicted) || (v_g - predicted).norm() > truncation {
                        continue;
                    }

                    let rgb = frame.at(py as usize, px as usize);
                    let word = &mut slice[x + y * res_x];
                    let (old, w) = unpack_color(*word);
                    let w_f = w as f32;
                    let mut fused = [0u8; 3];
                    for ch in 0..3 {
                        let avg = (w_f * old[ch] as f32 + rgb[ch] as f32) / (w_f + 1.0);
                        fused[ch] = avg.round().clamp(0.0, 255.0) as u8;
                    }
                    let w_next = w.saturating_add(1).min(max_weight);
                    *word = pack_color(fused, w_next);
                }
            }
        });
}
