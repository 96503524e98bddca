//! 6-DoF camera pose.

use nalgebra::{Isometry3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Rigid camera pose: a point p_cam in the camera frame maps to world
/// coordinates as `rotation * p_cam + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// Orthonormal rotation from camera frame to world frame.
    pub rotation: Rotation3<f32>,
    /// Camera origin in world coordinates, meters.
    pub translation: Vector3<f32>,
}

impl CameraPose {
    /// Create a pose from rotation and translation.
    #[inline]
    pub fn new(rotation: Rotation3<f32>, translation: Vector3<f32>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Identity pose at the world origin.
    #[inline]
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Map a camera-frame point into the world frame.
    #[inline]
    pub fn transform_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation * p + self.translation
    }

    /// Map a world point into the camera frame.
    #[inline]
    pub fn inverse_transform_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation.inverse() * (p - self.translation)
    }

    /// Convert to an isometry.
    pub fn to_isometry(&self) -> Isometry3<f32> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_rotation_matrix(&self.rotation),
        )
    }

    /// Build from an isometry.
    pub fn from_isometry(iso: &Isometry3<f32>) -> Self {
        Self {
            rotation: iso.rotation.to_rotation_matrix(),
            translation: iso.translation.vector,
        }
    }
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_transform_roundtrip() {
        let pose = CameraPose::new(
            Rotation3::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2),
            Vector3::new(1.0, -2.0, 0.5),
        );
        let p = Vector3::new(0.3, 0.7, 2.0);
        let back = pose.inverse_transform_point(&pose.transform_point(&p));
        assert_relative_eq!(back.x, p.x, epsilon = 1e-5);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-5);
        assert_relative_eq!(back.z, p.z, epsilon = 1e-5);
    }

    #[test]
    fn test_isometry_roundtrip() {
        let pose = CameraPose::new(
            Rotation3::from_axis_angle(&Vector3::x_axis(), 0.3),
            Vector3::new(0.1, 0.2, 0.3),
        );
        let back = CameraPose::from_isometry(&pose.to_isometry());
        assert_relative_eq!(
            (back.rotation.matrix() - pose.rotation.matrix()).norm(),
            0.0,
            epsilon = 1e-5
        );
        assert_relative_eq!((back.translation - pose.translation).norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_identity_is_noop() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(CameraPose::identity().transform_point(&p), p);
    }
}
