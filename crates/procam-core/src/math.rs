//! Mathematical type definitions and small helpers.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector2, Vector3};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// Convert a 2D point into homogeneous coordinates `(x, y, 1)`.
pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

/// Convert a 3D homogeneous vector `(x, y, w)` back to a 2D point `(x/w, y/w)`.
///
/// The caller is responsible for ensuring that `w != 0`.
pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Angle in radians between two rotation matrices.
///
/// Useful for comparing recovered poses against ground truth.
pub fn rotation_angle_between(a: &Mat3, b: &Mat3) -> Real {
    let diff = a.transpose() * b;
    ((diff.trace() - 1.0) * 0.5).clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    #[test]
    fn homogeneous_roundtrip() {
        let p = Pt2::new(3.0, -2.0);
        let h = to_homogeneous(&p);
        let back = from_homogeneous(&h);
        assert!((back - p).norm() < 1e-12);
    }

    #[test]
    fn rotation_angle_of_known_rotation() {
        let a = Rotation3::identity().into_inner();
        let b = Rotation3::from_euler_angles(0.0, 0.25, 0.0).into_inner();
        let angle = rotation_angle_between(&a, &b);
        assert!((angle - 0.25).abs() < 1e-10, "angle {}", angle);
    }
}
