//! Surface prediction by ray marching the TSDF.
//!
//! For every pixel a world-space ray is marched through the volume cube
//! in steps of 0.8·μ. A positive-to-negative sign change of the
//! trilinearly sampled TSDF marks a surface crossing; the crossing is
//! located by linear interpolation along the ray and its normal is the
//! normalized TSDF gradient. Pixels without a crossing emit NaN.

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::algorithms::fusion::TsdfVolume;
use crate::core::types::{invalid_map_pixel, CameraPose, Intrinsics, MapImage};

/// Ray march step length as a fraction of the truncation distance.
const STEP_SCALE: f32 = 0.8;

/// Entry and exit ray parameters of the axis-aligned volume cube.
///
/// Returns `None` when the ray misses the cube entirely.
fn intersect_cube(
    origin: &Vector3<f32>,
    dir: &Vector3<f32>,
    size: &Vector3<f32>,
) -> Option<(f32, f32)> {
    let mut t_near = 0.0f32;
    let mut t_far = f32::INFINITY;
    for axis in 0..3 {
        if dir[axis].abs() < 1e-12 {
            if origin[axis] < 0.0 || origin[axis] > size[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / dir[axis];
        let mut t0 = -origin[axis] * inv;
        let mut t1 = (size[axis] - origin[axis]) * inv;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_near = t_near.max(t0);
        t_far = t_far.min(t1);
    }
    (t_near < t_far).then_some((t_near, t_far))
}

/// Raycast the volume from `pose`, producing world-frame vertex and
/// normal maps at the resolution of the output buffers.
pub fn raycast(
    volume: &TsdfVolume,
    intr: &Intrinsics,
    pose: &CameraPose,
    truncation: f32,
    vmap: &mut MapImage,
    nmap: &mut MapImage,
) {
    let cols = vmap.cols();
    let origin = pose.translation;
    let size = volume.size();
    let step = STEP_SCALE * truncation;

    vmap.as_mut_slice()
        .par_chunks_mut(cols)
        .zip(nmap.as_mut_slice().par_chunks_mut(cols))
        .enumerate()
        .for_each(|(row, (v_row, n_row))| {
            for col in 0..cols {
                v_row[col] = invalid_map_pixel();
                n_row[col] = invalid_map_pixel();

                let dir = (pose.rotation * intr.ray_direction(col as f32, row as f32))
                    .normalize();
                let Some((t_near, t_far)) = intersect_cube(&origin, &dir, &size) else {
                    continue;
                };

                let mut t = t_near;
                let mut prev: Option<f32> = None;
                let mut prev_t = t;
                while t <= t_far {
                    let sample = volume.interpolate(&(origin + dir * t));
                    if let (Some(f_prev), Some(f_curr)) = (prev, sample) {
                        if f_prev > 0.0 && f_curr <= 0.0 {
                            let t_hit = prev_t + (t - prev_t) * f_prev / (f_prev - f_curr);
                            let hit = origin + dir * t_hit;
                            v_row[col] = hit;
                            if let Some(g) = volume.gradient(&hit) {
                                if let Some(n) = g.try_normalize(1e-12) {
                                    n_row[col] = n;
                                }
                            }
                            break;
                        }
                    }
                    prev = sample;
                    prev_t = t;
                    t += step;
                }
            }
        });
}
