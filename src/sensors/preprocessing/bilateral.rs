//! Bilateral denoising of raw depth.
//!
//! Domain-and-range Gaussian filter on millimeter depth. The range term
//! keeps depth discontinuities sharp while the domain term smooths
//! quantization noise on surfaces. Zero (invalid) pixels stay zero and
//! never contribute to their neighbors.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::types::DepthImage;

/// Configuration for the bilateral depth filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BilateralConfig {
    /// Spatial (domain) standard deviation, pixels.
    pub sigma_space: f32,

    /// Range standard deviation, millimeters.
    pub sigma_depth: f32,

    /// Window radius in pixels (window edge = 2 * radius + 1).
    pub radius: usize,
}

impl Default for BilateralConfig {
    fn default() -> Self {
        Self {
            sigma_space: 4.5,
            sigma_depth: 30.0,
            radius: 3,
        }
    }
}

/// Apply the bilateral filter to `src`, writing into `dst`.
///
/// `dst` must have the same dimensions as `src`.
pub fn bilateral_filter(src: &DepthImage, dst: &mut DepthImage, config: &BilateralConfig) {
    assert_eq!(src.rows(), dst.rows());
    assert_eq!(src.cols(), dst.cols());

    let rows = src.rows();
    let cols = src.cols();
    let radius = config.radius as i64;
    let inv_2ss = 0.5 / (config.sigma_space * config.sigma_space);
    let inv_2sd = 0.5 / (config.sigma_depth * config.sigma_depth);

    dst.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let center = src.at(row, col);
                if center == 0 {
                    *out = 0;
                    continue;
                }
                let center_f = center as f32;

                let mut sum = 0.0f32;
                let mut weight_sum = 0.0f32;

                let r0 = (row as i64 - radius).max(0) as usize;
                let r1 = (row as i64 + radius).min(rows as i64 - 1) as usize;
                let c0 = (col as i64 - radius).max(0) as usize;
                let c1 = (col as i64 + radius).min(cols as i64 - 1) as usize;

                for nr in r0..=r1 {
                    for nc in c0..=c1 {
                        let d = src.at(nr, nc);
                        if d == 0 {
                            continue;
                        }
                        let dr = nr as f32 - row as f32;
                        let dc = nc as f32 - col as f32;
                        let dd = d as f32 - center_f;
                        let w = (-(dr * dr + dc * dc) * inv_2ss - dd * dd * inv_2sd).exp();
                        sum += d as f32 * w;
                        weight_sum += w;
                    }
                }

                *out = (sum / weight_sum).round().clamp(0.0, u16::MAX as f32) as u16;
            }
        });
}
