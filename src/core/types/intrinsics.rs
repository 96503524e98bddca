//! Pinhole camera intrinsics.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Pinhole intrinsic parameters in pixels.
///
/// Follows the usual convention: a camera-frame point (x, y, z) with
/// z > 0 projects to pixel (x · fx / z + cx, y · fy / z + cy).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length along x, pixels.
    pub fx: f32,
    /// Focal length along y, pixels.
    pub fy: f32,
    /// Principal point x, pixels.
    pub cx: f32,
    /// Principal point y, pixels.
    pub cy: f32,
}

impl Intrinsics {
    /// Create new intrinsics.
    #[inline]
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Intrinsics for pyramid level `level` (all parameters halved per level).
    #[inline]
    pub fn at_level(&self, level: usize) -> Self {
        let div = (1 << level) as f32;
        Self {
            fx: self.fx / div,
            fy: self.fy / div,
            cx: self.cx / div,
            cy: self.cy / div,
        }
    }

    /// Project a camera-frame point to continuous pixel coordinates.
    ///
    /// The caller is responsible for checking z > 0 beforehand.
    #[inline]
    pub fn project(&self, p: &Vector3<f32>) -> (f32, f32) {
        let inv_z = 1.0 / p.z;
        (p.x * self.fx * inv_z + self.cx, p.y * self.fy * inv_z + self.cy)
    }

    /// Back-project pixel (u, v) at depth `z` meters into the camera frame.
    #[inline]
    pub fn back_project(&self, u: f32, v: f32, z: f32) -> Vector3<f32> {
        Vector3::new(z * (u - self.cx) / self.fx, z * (v - self.cy) / self.fy, z)
    }

    /// Unit-depth ray direction through pixel (u, v), camera frame.
    #[inline]
    pub fn ray_direction(&self, u: f32, v: f32) -> Vector3<f32> {
        Vector3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0)
    }
}
