use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use procam_core::{Iso3, Mat3, Real, Vec3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoseError {
    #[error("intrinsics matrix is not invertible")]
    SingularIntrinsics,
    #[error("svd failed")]
    SvdFailed,
    #[error("homography columns are degenerate")]
    Degenerate,
}

/// Decompose a plane-induced homography into a rigid pose.
///
/// `hmtx` maps board-plane coordinates (Z=0) to pixels under intrinsics
/// `kmtx`; the result maps board coordinates into the device frame. The
/// rotation estimate is projected onto SO(3) by polar decomposition.
pub fn pose_from_homography(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3, PoseError> {
    let k_inv = kmtx.try_inverse().ok_or(PoseError::SingularIntrinsics)?;

    let h1 = hmtx.column(0);
    let h2 = hmtx.column(1);
    let h3 = hmtx.column(2).into_owned();

    let k_inv_h1 = k_inv * h1;
    let k_inv_h2 = k_inv * h2;

    // Scale factor: normalize the first two columns (average for robustness).
    let norm1 = k_inv_h1.norm();
    let norm2 = k_inv_h2.norm();
    if norm1 < 1e-12 || norm2 < 1e-12 {
        return Err(PoseError::Degenerate);
    }
    let mut lambda = 2.0 / (norm1 + norm2);

    // The homography is defined up to sign; the board must sit in front of
    // the device, so pick the scale sign that makes t_z positive.
    let k_inv_h3 = k_inv * h3;
    if k_inv_h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1: Vec3 = (k_inv_h1 * lambda).into_owned();
    let r2: Vec3 = (k_inv_h2 * lambda).into_owned();
    let r3 = r1.cross(&r2);

    let mut r_mat = Mat3::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    // Project onto SO(3).
    let svd = r_mat.svd(true, true);
    let mut u = svd.u.ok_or(PoseError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(PoseError::SvdFailed)?;
    let mut r_orth = u * v_t;

    if r_orth.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
        r_orth = u * v_t;
    }

    let t_vec: Vec3 = k_inv_h3 * lambda;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));

    Ok(Iso3::from_parts(Translation3::from(t_vec), rot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use procam_core::rotation_angle_between;

    fn make_kmtx() -> Mat3 {
        Mat3::new(800.0, 0.0, 640.0, 0.0, 780.0, 360.0, 0.0, 0.0, 1.0)
    }

    fn homography_for_pose(kmtx: &Mat3, rot: &Rotation3<Real>, t: &Vec3) -> Mat3 {
        let r_mat = rot.matrix();
        let mut hmtx = Mat3::zeros();
        hmtx.set_column(0, &(kmtx * r_mat.column(0)));
        hmtx.set_column(1, &(kmtx * r_mat.column(1)));
        hmtx.set_column(2, &(kmtx * t));
        hmtx
    }

    #[test]
    fn recovers_pose_from_homography() {
        let kmtx = make_kmtx();
        let rot = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let t = Vec3::new(0.1, -0.05, 1.0);
        let hmtx = homography_for_pose(&kmtx, &rot, &t);

        let iso = pose_from_homography(&kmtx, &hmtx).unwrap();

        assert!((iso.translation.vector - t).norm() < 1e-6);
        let angle = rotation_angle_between(
            iso.rotation.to_rotation_matrix().matrix(),
            rot.matrix(),
        );
        assert!(angle < 1e-6, "rotation error {}", angle);
    }

    #[test]
    fn pose_survives_homography_scaling() {
        let kmtx = make_kmtx();
        let rot = Rotation3::from_euler_angles(-0.15, 0.1, 0.0);
        let t = Vec3::new(-0.02, 0.08, 1.4);
        let hmtx = homography_for_pose(&kmtx, &rot, &t) * -3.7;

        let iso = pose_from_homography(&kmtx, &hmtx).unwrap();

        assert!(
            (iso.translation.vector - t).norm() < 1e-6,
            "translation {:?}",
            iso.translation.vector
        );
    }
}
