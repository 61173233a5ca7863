//! Synthetic planar target helpers.

use nalgebra::{Rotation3, Translation3};

use crate::math::{Iso3, Pt2, Pt3, Real};
use crate::models::PinholeCamera;

/// Generate a planar grid of 3D points (Z=0) with `nx * ny` points, row-major.
pub fn grid_points(nx: usize, ny: usize, spacing: Real) -> Vec<Pt3> {
    let mut points = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            points.push(Pt3::new(i as Real * spacing, j as Real * spacing, 0.0));
        }
    }
    points
}

/// Deterministic ramp of `n_views` board poses in front of the camera.
///
/// Tilts alternate around both board axes so the homography set is
/// non-degenerate for intrinsics estimation; the stand-off distance ramps
/// from `z_start` by `z_step` per view.
pub fn board_poses(n_views: usize, z_start: Real, z_step: Real) -> Vec<Iso3> {
    (0..n_views)
        .map(|k| {
            let phase = k as Real;
            let rx = 0.22 * (0.9 * phase + 0.3).sin();
            let ry = 0.25 * (0.7 * phase + 1.1).cos();
            let rz = 0.10 * (0.5 * phase).sin();
            let tx = 25.0 * (1.3 * phase).sin() - 90.0;
            let ty = 20.0 * (1.7 * phase).cos() - 70.0;
            Iso3::from_parts(
                Translation3::new(tx, ty, z_start + z_step * phase),
                Rotation3::from_euler_angles(rx, ry, rz).into(),
            )
        })
        .collect()
}

/// Project a planar target into the camera, requiring every point to be
/// projectable.
///
/// `cam_from_target` maps target-frame points into the camera frame. Returns
/// `None` when a point falls behind the camera.
pub fn project_board(
    camera: &PinholeCamera,
    cam_from_target: &Iso3,
    target_points: &[Pt3],
) -> Option<Vec<Pt2>> {
    let mut pixels = Vec::with_capacity(target_points.len());
    for pw in target_points {
        let pc = cam_from_target.transform_point(pw);
        pixels.push(camera.project_point(&pc)?);
    }
    Some(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BrownConrady5, Intrinsics};

    #[test]
    fn grid_points_order_is_stable() {
        let pts = grid_points(2, 3, 0.5);
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[0], Pt3::new(0.0, 0.0, 0.0));
        assert_eq!(pts[1], Pt3::new(0.5, 0.0, 0.0));
        assert_eq!(pts[2], Pt3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn pose_ramp_projects_fully() {
        let cam = PinholeCamera::new(
            Intrinsics {
                fx: 900.0,
                fy: 900.0,
                cx: 512.0,
                cy: 384.0,
                skew: 0.0,
            },
            BrownConrady5::none(),
        );
        let board = grid_points(8, 6, 30.0);
        for pose in board_poses(15, 600.0, 25.0) {
            let pixels = project_board(&cam, &pose, &board).expect("board in front of camera");
            assert_eq!(pixels.len(), board.len());
        }
    }
}
