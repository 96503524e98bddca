//! Coarse-to-fine projective point-to-plane ICP.
//!
//! Refines the camera pose of the newest frame against the
//! model-predicted vertex/normal maps raycast at the previous pose.
//! Correspondences come from projective data association: each current
//! vertex is transformed by the pose estimate, projected into the
//! previous camera, and paired with the predicted map entry at that
//! pixel.
//!
//! # Algorithm
//!
//! ```text
//! for level = coarsest .. finest:
//!     repeat iterations[level] times:
//!         1. associate current->predicted by projection, reject by
//!            distance, normal angle, NaN
//!         2. accumulate 6x6 normal equations of the linearized
//!            point-to-plane residual (parallel reduction)
//!         3. solve A ξ = b by Cholesky; singular A = tracking lost
//!         4. compose the increment onto the pose estimate
//! ```
//!
//! The rotation increment is parametrized as Rz(γ)·Ry(β)·Rx(α) about the
//! world axes, matching the order of the linearization.

use nalgebra::{Matrix6, Vector3, Vector6};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::math::{rotation_zyx, solve_normal_equations};
use crate::core::types::{map_pixel_valid, CameraPose, Intrinsics, MapImage};
use crate::core::PYRAMID_LEVELS;

/// Determinant threshold below which the normal matrix is singular.
const DET_EPSILON: f64 = 1e-15;

/// Configuration for the ICP solver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IcpConfig {
    /// Iteration count per pyramid level, finest (level 0) first.
    pub iterations: [usize; PYRAMID_LEVELS],

    /// Maximum Euclidean distance between corresponding points, meters.
    pub distance_threshold: f32,

    /// Maximum angle between corresponding normals, expressed as the
    /// sine of the angle.
    pub angle_threshold: f32,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            iterations: [10, 5, 4],
            distance_threshold: 0.10,
            angle_threshold: (20.0f32).to_radians().sin(),
        }
    }
}

/// Accumulated normal equations: the 21 upper-triangular entries of
/// A = ΣJᵀJ, the 6 entries of b = ΣJᵀr, and the correspondence count.
#[derive(Debug, Clone, Copy)]
struct NormalEquations {
    a: [f64; 21],
    b: [f64; 6],
    count: usize,
}

impl NormalEquations {
    fn zero() -> Self {
        Self {
            a: [0.0; 21],
            b: [0.0; 6],
            count: 0,
        }
    }

    #[inline]
    fn add_row(&mut self, j: &[f64; 6], r: f64) {
        let mut idx = 0;
        for i in 0..6 {
            for k in i..6 {
                self.a[idx] += j[i] * j[k];
                idx += 1;
            }
            self.b[i] += j[i] * r;
        }
        self.count += 1;
    }

    fn merge(mut self, other: Self) -> Self {
        for i in 0..21 {
            self.a[i] += other.a[i];
        }
        for i in 0..6 {
            self.b[i] += other.b[i];
        }
        self.count += other.count;
        self
    }

    fn into_system(self) -> (Matrix6<f64>, Vector6<f64>) {
        let mut a = Matrix6::zeros();
        let mut idx = 0;
        for i in 0..6 {
            for k in i..6 {
                a[(i, k)] = self.a[idx];
                a[(k, i)] = self.a[idx];
                idx += 1;
            }
        }
        (a, Vector6::from_column_slice(&self.b))
    }
}

/// Point-to-plane ICP matcher.
#[derive(Debug, Clone)]
pub struct PointToPlaneIcp {
    config: IcpConfig,
}

impl PointToPlaneIcp {
    /// Create a matcher with the given configuration.
    pub fn new(config: IcpConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Update the correspondence rejection thresholds.
    pub fn set_filtering_params(&mut self, distance_threshold: f32, angle_threshold: f32) {
        self.config.distance_threshold = distance_threshold;
        self.config.angle_threshold = angle_threshold;
    }

    /// Estimate the pose of the current frame.
    ///
    /// `curr_*` are the camera-frame map pyramids of the newest frame;
    /// `prev_*` are the world-frame predicted map pyramids raycast after
    /// the previous frame. Returns `None` when the normal matrix turns
    /// singular or non-finite, which the caller must treat as tracking
    /// loss.
    pub fn align(
        &self,
        curr_vmaps: &[MapImage],
        curr_nmaps: &[MapImage],
        prev_vmaps: &[MapImage],
        prev_nmaps: &[MapImage],
        intr: &Intrinsics,
        prev_pose: &CameraPose,
    ) -> Option<CameraPose> {
        let mut pose = *prev_pose;
        let prev_rot_inv = prev_pose.rotation.inverse();

        for level in (0..PYRAMID_LEVELS).rev() {
            let intr_level = intr.at_level(level);
            for _ in 0..self.config.iterations[level] {
                let eqs = self.accumulate(
                    &curr_vmaps[level],
                    &curr_nmaps[level],
                    &prev_vmaps[level],
                    &prev_nmaps[level],
                    &intr_level,
                    &pose,
                    prev_pose,
                    &prev_rot_inv,
                );

                let (a, b) = eqs.into_system();
                let xi = solve_normal_equations(&a, &b, DET_EPSILON)?;

                let rinc = rotation_zyx(xi[0], xi[1], xi[2]);
                let tinc = Vector3::new(xi[3], xi[4], xi[5]);
                pose.translation = rinc * pose.translation + tinc;
                pose.rotation = rinc * pose.rotation;
            }
        }

        Some(pose)
    }

    #[allow(clippy::too_many_arguments)]
    fn accumulate(
        &self,
        vmap_curr: &MapImage,
        nmap_curr: &MapImage,
        vmap_prev: &MapImage,
        nmap_prev: &MapImage,
        intr: &Intrinsics,
        pose: &CameraPose,
        prev_pose: &CameraPose,
        prev_rot_inv: &nalgebra::Rotation3<f32>,
    ) -> NormalEquations {
        let rows = vmap_curr.rows();
        let cols = vmap_curr.cols();
        let prev_rows = vmap_prev.rows() as i32;
        let prev_cols = vmap_prev.cols() as i32;
        let dist_thres = self.config.distance_threshold;
        let angle_thres = self.config.angle_threshold;

        (0..rows)
            .into_par_iter()
            .fold(NormalEquations::zero, |mut acc, row| {
                for col in 0..cols {
                    let n_cam = nmap_curr.at(row, col);
                    if !map_pixel_valid(&n_cam) {
                        continue;
                    }
                    let v_cam = vmap_curr.at(row, col);
                    if !map_pixel_valid(&v_cam) {
                        continue;
                    }

                    // Current estimate: camera -> world.
                    let v = pose.transform_point(&v_cam);
                    let n = pose.rotation * n_cam;

                    // Project into the previous camera for association.
                    let v_prev_cam = prev_rot_inv * (v - prev_pose.translation);
                    if v_prev_cam.z <= 0.0 {
                        continue;
                    }
                    let (u, w) = intr.project(&v_prev_cam);
                    let px = u.round() as i32;
                    let py = w.round() as i32;
                    if px < 0 || py < 0 || px >= prev_cols || py >= prev_rows {
                        continue;
                    }

                    let v_hat = vmap_prev.at(py as usize, px as usize);
                    if !map_pixel_valid(&v_hat) {
                        continue;
                    }
                    let n_hat = nmap_prev.at(py as usize, px as usize);
                    if !map_pixel_valid(&n_hat) {
                        continue;
                    }

                    if (v - v_hat).norm() > dist_thres {
                        continue;
                    }
                    if n.cross(&n_hat).norm() > angle_thres {
                        continue;
                    }

                    let rot_row = v.cross(&n_hat);
                    let j = [
                        rot_row.x as f64,
                        rot_row.y as f64,
                        rot_row.z as f64,
                        n_hat.x as f64,
                        n_hat.y as f64,
                        n_hat.z as f64,
                    ];
                    let r = n_hat.dot(&(v_hat - v)) as f64;
                    acc.add_row(&j, r);
                }
                acc
            })
            .reduce(NormalEquations::zero, NormalEquations::merge)
    }
}

impl Default for PointToPlaneIcp {
    fn default() -> Self {
        Self::new(IcpConfig::default())
    }
}
