//! Depth far-clipping and 2x pyramid construction.

use rayon::prelude::*;

use crate::core::types::DepthImage;

/// 5x5 binomial kernel weights, one axis.
const KERNEL: [f32; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];

/// Depth-difference gate for pyramid averaging, millimeters.
///
/// Neighbors farther than this from the window center are excluded so a
/// downsampled pixel never mixes foreground and background surfaces.
const DEPTH_GATE_MM: f32 = 90.0;

/// Zero out every pixel beyond `max_distance` meters.
pub fn truncate_depth(depth: &mut DepthImage, max_distance: f32) {
    let max_mm = (max_distance * 1000.0) as u16;
    depth.as_mut_slice().par_iter_mut().for_each(|d| {
        if *d > max_mm {
            *d = 0;
        }
    });
}

/// Downsample `src` by 2x into `dst` with a Gaussian-weighted average of
/// valid pixels.
///
/// `dst` must be exactly half the size of `src` in both dimensions.
/// Invalid (zero) pixels are ignored; a window with no valid pixel near
/// the center depth produces zero.
pub fn pyr_down(src: &DepthImage, dst: &mut DepthImage) {
    assert_eq!(dst.rows(), src.rows() / 2);
    assert_eq!(dst.cols(), src.cols() / 2);

    let src_rows = src.rows() as i64;
    let src_cols = src.cols() as i64;
    let cols = dst.cols();

    dst.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let center_r = 2 * row as i64;
                let center_c = 2 * col as i64;
                let center = src.at(center_r as usize, center_c as usize);
                if center == 0 {
                    *out = 0;
                    continue;
                }
                let center_f = center as f32;

                let mut sum = 0.0f32;
                let mut weight_sum = 0.0f32;
                for (ki, &kw_r) in KERNEL.iter().enumerate() {
                    let nr = center_r + ki as i64 - 2;
                    if nr < 0 || nr >= src_rows {
                        continue;
                    }
                    for (kj, &kw_c) in KERNEL.iter().enumerate() {
                        let nc = center_c + kj as i64 - 2;
                        if nc < 0 || nc >= src_cols {
                            continue;
                        }
                        let d = src.at(nr as usize, nc as usize);
                        if d == 0 || (d as f32 - center_f).abs() > DEPTH_GATE_MM {
                            continue;
                        }
                        let w = kw_r * kw_c;
                        sum += d as f32 * w;
                        weight_sum += w;
                    }
                }

                *out = if weight_sum > 0.0 {
                    (sum / weight_sum).round() as u16
                } else {
                    0
                };
            }
        });
}
