//! Small linear-algebra helpers for pose estimation.

use nalgebra::{Matrix3, Matrix6, Rotation3, SymmetricEigen, Vector3, Vector6};

/// Incremental rotation Rz(gamma) * Ry(beta) * Rx(alpha).
///
/// This is the composition the point-to-plane linearization solves for:
/// the three solved angles are applied about the world X, Y, Z axes in
/// that order.
#[inline]
pub fn rotation_zyx(alpha: f32, beta: f32, gamma: f32) -> Rotation3<f32> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), gamma)
        * Rotation3::from_axis_angle(&Vector3::y_axis(), beta)
        * Rotation3::from_axis_angle(&Vector3::x_axis(), alpha)
}

/// Solve the 6x6 normal equations `a * x = b` by Cholesky decomposition.
///
/// Returns `None` when the system is unusable: |det a| below `det_eps`,
/// a non-finite entry, or a decomposition failure on a non-positive
/// system. Callers treat `None` as tracking loss.
pub fn solve_normal_equations(
    a: &Matrix6<f64>,
    b: &Vector6<f64>,
    det_eps: f64,
) -> Option<Vector6<f32>> {
    if a.iter().any(|v| !v.is_finite()) || b.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let det = a.determinant();
    if !det.is_finite() || det.abs() < det_eps {
        return None;
    }
    let solution = a.cholesky()?.solve(b);
    Some(solution.map(|v| v as f32))
}

/// Unit eigenvector of the smallest eigenvalue of a symmetric 3x3 matrix.
///
/// Used for covariance-based surface normal estimation. Returns `None`
/// when the decomposition produces a degenerate direction.
pub fn smallest_eigenvector(m: &Matrix3<f32>) -> Option<Vector3<f32>> {
    let eigen = SymmetricEigen::new(*m);
    let mut min_idx = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let v: Vector3<f32> = eigen.eigenvectors.column(min_idx).clone_owned();
    v.try_normalize(1e-12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rotation_zyx_axis_order() {
        // A pure gamma rotation must equal a plain Z rotation.
        let r = rotation_zyx(0.0, 0.0, 0.3);
        let z = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.3);
        assert_relative_eq!((r.matrix() - z.matrix()).norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_zyx_small_angle_composition() {
        // For small angles the composition is approximately I + [w]x.
        let (a, b, g) = (1e-3, -2e-3, 0.5e-3);
        let r = rotation_zyx(a, b, g);
        let m = r.matrix();
        assert_relative_eq!(m[(2, 1)], a, epsilon = 1e-5);
        assert_relative_eq!(m[(0, 2)], b, epsilon = 1e-5);
        assert_relative_eq!(m[(1, 0)], g, epsilon = 1e-5);
    }

    #[test]
    fn test_solve_identity_system() {
        let a = Matrix6::<f64>::identity() * 4.0;
        let b = Vector6::<f64>::repeat(2.0);
        let x = solve_normal_equations(&a, &b, 1e-15).unwrap();
        for i in 0..6 {
            assert_relative_eq!(x[i], 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_solve_rejects_singular() {
        let a = Matrix6::<f64>::zeros();
        let b = Vector6::<f64>::zeros();
        assert!(solve_normal_equations(&a, &b, 1e-15).is_none());
    }

    #[test]
    fn test_solve_rejects_non_finite() {
        let mut a = Matrix6::<f64>::identity();
        a[(3, 3)] = f64::NAN;
        let b = Vector6::<f64>::zeros();
        assert!(solve_normal_equations(&a, &b, 1e-15).is_none());
    }

    #[test]
    fn test_smallest_eigenvector_of_plane_covariance() {
        // Covariance of points spread in the XY plane: the smallest
        // eigenvector must be +/- Z.
        let m = Matrix3::new(2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.01);
        let v = smallest_eigenvector(&m).unwrap();
        assert_relative_eq!(v.z.abs(), 1.0, epsilon = 1e-5);
    }
}
