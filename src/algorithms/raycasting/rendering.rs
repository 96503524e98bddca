//! Shaded rendering of predicted maps.

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::core::types::{map_pixel_valid, ColorImage, MapImage};

/// Ambient reflectance of the shaded surface.
const KA: f32 = 0.3;
/// Diffuse reflectance of the shaded surface.
const KD: f32 = 0.7;

/// Render a vertex/normal map pair with Lambertian shading under a
/// single point light. Invalid pixels come out black.
pub fn render_shaded(vmap: &MapImage, nmap: &MapImage, light_pos: Vector3<f32>) -> ColorImage {
    let rows = vmap.rows();
    let cols = vmap.cols();
    let mut view = ColorImage::new(rows, cols, [0, 0, 0]);

    view.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let v = vmap.at(row, col);
                let n = nmap.at(row, col);
                if !map_pixel_valid(&v) || !map_pixel_valid(&n) {
                    *out = [0, 0, 0];
                    continue;
                }
                let light_dir = match (light_pos - v).try_normalize(1e-12) {
                    Some(l) => l,
                    None => {
                        *out = [0, 0, 0];
                        continue;
                    }
                };
                let diffuse = n.dot(&light_dir).max(0.0);
                let intensity = (KA + KD * diffuse).clamp(0.0, 1.0);
                let byte = (intensity * 255.0).round() as u8;
                *out = [byte, byte, byte];
            }
        });

    view
}

/// Alpha-blend a live color frame over a rendered view in place.
///
/// `colors_weight` is the opacity of the color frame, clamped to [0, 1].
pub fn paint_view(rgb: &ColorImage, view: &mut ColorImage, colors_weight: f32) {
    assert_eq!(rgb.rows(), view.rows());
    assert_eq!(rgb.cols(), view.cols());
    let w = colors_weight.clamp(0.0, 1.0);

    view.as_mut_slice()
        .par_iter_mut()
        .zip(rgb.as_slice().par_iter())
        .for_each(|(dst, src)| {
            for ch in 0..3 {
                let blended = dst[ch] as f32 * (1.0 - w) + src[ch] as f32 * w;
                dst[ch] = blended.round() as u8;
            }
        });
}

/// A surface point paired with its unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointNormal {
    /// Surface point, world coordinates, meters.
    pub point: Vector3<f32>,
    /// Unit surface normal.
    pub normal: Vector3<f32>,
}

/// Zip an extracted cloud with its normals into one buffer.
///
/// The output length is the shorter of the two inputs.
pub fn merge_point_normal(
    cloud: &[Vector3<f32>],
    normals: &[Vector3<f32>],
) -> Vec<PointNormal> {
    cloud
        .iter()
        .zip(normals.iter())
        .map(|(&point, &normal)| PointNormal { point, normal })
        .collect()
}
