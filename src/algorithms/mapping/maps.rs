//! Vertex and normal map construction.
//!
//! A vertex map back-projects each valid depth pixel into a 3D point in
//! the camera frame; a normal map estimates the local surface normal
//! from the eigen-decomposition of the neighborhood covariance. Both are
//! pixel-aligned with the source depth image and use NaN as the invalid
//! sentinel.

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::core::math::smallest_eigenvector;
use crate::core::types::{
    invalid_map_pixel, map_pixel_valid, CameraPose, DepthImage, Intrinsics, MapImage,
};

/// Neighborhood radius for covariance-based normal estimation.
const NORMAL_WINDOW_RADIUS: usize = 2;

/// Back-project a depth image into a camera-frame vertex map.
///
/// `intr` must already be scaled to the pyramid level of `depth`.
pub fn create_vertex_map(intr: &Intrinsics, depth: &DepthImage, vmap: &mut MapImage) {
    assert_eq!(depth.rows(), vmap.rows());
    assert_eq!(depth.cols(), vmap.cols());
    let cols = depth.cols();

    vmap.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let d = depth.at(row, col);
                *out = if d > 0 {
                    let z = d as f32 * 1e-3;
                    intr.back_project(col as f32, row as f32, z)
                } else {
                    invalid_map_pixel()
                };
            }
        });
}

/// Estimate unit surface normals from a vertex map.
///
/// For each pixel the full (2r+1)x(2r+1) vertex neighborhood must be
/// valid; the normal is the smallest eigenvector of the neighborhood
/// covariance, oriented toward the camera. Border pixels and pixels with
/// incomplete neighborhoods produce NaN.
pub fn compute_normals(vmap: &MapImage, nmap: &mut MapImage) {
    assert_eq!(vmap.rows(), nmap.rows());
    assert_eq!(vmap.cols(), nmap.cols());
    let rows = vmap.rows();
    let cols = vmap.cols();
    let r = NORMAL_WINDOW_RADIUS;

    nmap.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                *out = invalid_map_pixel();
                if row < r || row + r >= rows || col < r || col + r >= cols {
                    continue;
                }
                let center = vmap.at(row, col);
                if !map_pixel_valid(&center) {
                    continue;
                }

                let mut centroid = Vector3::zeros();
                let mut complete = true;
                'gather: for nr in row - r..=row + r {
                    for nc in col - r..=col + r {
                        let v = vmap.at(nr, nc);
                        if !map_pixel_valid(&v) {
                            complete = false;
                            break 'gather;
                        }
                        centroid += v;
                    }
                }
                if !complete {
                    continue;
                }
                let count = ((2 * r + 1) * (2 * r + 1)) as f32;
                centroid /= count;

                let mut cov = Matrix3::zeros();
                for nr in row - r..=row + r {
                    for nc in col - r..=col + r {
                        let d = vmap.at(nr, nc) - centroid;
                        cov += d * d.transpose();
                    }
                }

                if let Some(mut n) = smallest_eigenvector(&cov) {
                    // The surface faces the camera at the origin.
                    if n.dot(&center) > 0.0 {
                        n = -n;
                    }
                    *out = n;
                }
            }
        });
}

/// Rigidly transform a vertex/normal map pair into the world frame.
pub fn transform_maps(
    vmap: &MapImage,
    nmap: &MapImage,
    pose: &CameraPose,
    vmap_out: &mut MapImage,
    nmap_out: &mut MapImage,
) {
    let cols = vmap.cols();
    vmap_out
        .as_mut_slice()
        .par_chunks_mut(cols)
        .zip(nmap_out.as_mut_slice().par_chunks_mut(cols))
        .enumerate()
        .for_each(|(row, (v_row, n_row))| {
            for col in 0..cols {
                let v = vmap.at(row, col);
                let n = nmap.at(row, col);
                v_row[col] = if map_pixel_valid(&v) {
                    pose.transform_point(&v)
                } else {
                    invalid_map_pixel()
                };
                n_row[col] = if map_pixel_valid(&n) {
                    pose.rotation * n
                } else {
                    invalid_map_pixel()
                };
            }
        });
}

/// 2x downsample a vertex map by averaging each 2x2 block.
///
/// A block containing any invalid pixel produces NaN, so holes are
/// preserved rather than inpainted.
pub fn resize_vertex_map(src: &MapImage, dst: &mut MapImage) {
    resize_map(src, dst, false);
}

/// 2x downsample a normal map; averaged normals are re-normalized.
pub fn resize_normal_map(src: &MapImage, dst: &mut MapImage) {
    resize_map(src, dst, true);
}

fn resize_map(src: &MapImage, dst: &mut MapImage, normalize: bool) {
    assert_eq!(dst.rows(), src.rows() / 2);
    assert_eq!(dst.cols(), src.cols() / 2);
    let cols = dst.cols();

    dst.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let r = 2 * row;
                let c = 2 * col;
                let p00 = src.at(r, c);
                let p01 = src.at(r, c + 1);
                let p10 = src.at(r + 1, c);
                let p11 = src.at(r + 1, c + 1);

                if !(map_pixel_valid(&p00)
                    && map_pixel_valid(&p01)
                    && map_pixel_valid(&p10)
                    && map_pixel_valid(&p11))
                {
                    *out = invalid_map_pixel();
                    continue;
                }

                let mean = (p00 + p01 + p10 + p11) * 0.25;
                *out = if normalize {
                    mean.try_normalize(1e-12).unwrap_or_else(invalid_map_pixel)
                } else {
                    mean
                };
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_intrinsics() -> Intrinsics {
        Intrinsics::new(100.0, 100.0, 8.0, 8.0)
    }

    #[test]
    fn test_vertex_map_backprojection() {
        let intr = test_intrinsics();
        let depth = DepthImage::new(16, 16, 2000);
        let mut vmap = MapImage::new(16, 16, invalid_map_pixel());
        create_vertex_map(&intr, &depth, &mut vmap);

        let v = vmap.at(8, 8);
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.z, 2.0, epsilon = 1e-6);

        let v2 = vmap.at(8, 13);
        assert_relative_eq!(v2.x, 2.0 * 5.0 / 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_vertex_map_invalid_depth() {
        let intr = test_intrinsics();
        let mut depth = DepthImage::new(16, 16, 1000);
        depth.set(3, 3, 0);
        let mut vmap = MapImage::new(16, 16, invalid_map_pixel());
        create_vertex_map(&intr, &depth, &mut vmap);
        assert!(!map_pixel_valid(&vmap.at(3, 3)));
        assert!(map_pixel_valid(&vmap.at(3, 4)));
    }

    #[test]
    fn test_normals_of_flat_plane_face_camera() {
        let intr = test_intrinsics();
        let depth = DepthImage::new(16, 16, 1000);
        let mut vmap = MapImage::new(16, 16, invalid_map_pixel());
        let mut nmap = MapImage::new(16, 16, invalid_map_pixel());
        create_vertex_map(&intr, &depth, &mut vmap);
        compute_normals(&vmap, &mut nmap);

        let n = nmap.at(8, 8);
        assert!(map_pixel_valid(&n));
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-4);
        // Fronto-parallel plane at z = 1: normal points back along -Z.
        assert!(n.z < -0.99, "normal {:?}", n);
    }

    #[test]
    fn test_normals_border_invalid() {
        let intr = test_intrinsics();
        let depth = DepthImage::new(16, 16, 1000);
        let mut vmap = MapImage::new(16, 16, invalid_map_pixel());
        let mut nmap = MapImage::new(16, 16, invalid_map_pixel());
        create_vertex_map(&intr, &depth, &mut vmap);
        compute_normals(&vmap, &mut nmap);
        assert!(!map_pixel_valid(&nmap.at(0, 8)));
        assert!(!map_pixel_valid(&nmap.at(8, 1)));
    }

    #[test]
    fn test_transform_maps_applies_pose() {
        let mut vmap = MapImage::new(2, 2, invalid_map_pixel());
        let mut nmap = MapImage::new(2, 2, Vector3::new(0.0, 0.0, -1.0));
        vmap.set(0, 0, Vector3::new(0.0, 0.0, 1.0));

        let pose = CameraPose::new(
            nalgebra::Rotation3::identity(),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let mut v_out = MapImage::new(2, 2, invalid_map_pixel());
        let mut n_out = MapImage::new(2, 2, invalid_map_pixel());
        transform_maps(&vmap, &nmap, &pose, &mut v_out, &mut n_out);

        assert_relative_eq!(v_out.at(0, 0).z, 4.0, epsilon = 1e-6);
        // Normals are rotated but never translated.
        assert_relative_eq!(n_out.at(0, 0).z, -1.0, epsilon = 1e-6);
        // NaN vertices stay NaN.
        assert!(!map_pixel_valid(&v_out.at(1, 1)));
    }

    #[test]
    fn test_resize_preserves_holes() {
        let mut src = MapImage::new(4, 4, Vector3::new(1.0, 0.0, 0.0));
        src.set(0, 0, invalid_map_pixel());
        let mut dst = MapImage::new(2, 2, invalid_map_pixel());
        resize_vertex_map(&src, &mut dst);
        assert!(!map_pixel_valid(&dst.at(0, 0)));
        assert!(map_pixel_valid(&dst.at(1, 1)));
    }

    #[test]
    fn test_resize_normal_map_renormalizes() {
        let src = MapImage::new(4, 4, Vector3::new(0.0, 0.0, -1.0));
        let mut dst = MapImage::new(2, 2, invalid_map_pixel());
        resize_normal_map(&src, &mut dst);
        assert_relative_eq!(dst.at(0, 0).norm(), 1.0, epsilon = 1e-6);
    }
}
