use serde::{Deserialize, Serialize};

use super::{BrownConrady5, Intrinsics};
use crate::math::{Pt2, Pt3, Vec2, Vec3};

/// Pinhole camera with Brown-Conrady distortion.
///
/// Used for the physical camera and for the projector modelled as an inverse
/// camera.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: Intrinsics,
    pub distortion: BrownConrady5,
}

impl PinholeCamera {
    pub fn new(intrinsics: Intrinsics, distortion: BrownConrady5) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Project a point in the device frame to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the optical centre plane.
    pub fn project_point(&self, p: &Pt3) -> Option<Pt2> {
        if p.z <= 0.0 {
            return None;
        }
        let n_undist = Vec2::new(p.x / p.z, p.y / p.z);
        let n_dist = self.distortion.distort(&n_undist);
        Some(self.intrinsics.normalized_to_pixel(&n_dist))
    }

    /// Back-project a pixel to a unit viewing ray in the device frame.
    pub fn backproject_pixel(&self, pixel: &Pt2) -> Vec3 {
        let n_dist = self.intrinsics.pixel_to_normalized(pixel);
        let n_undist = self.distortion.undistort(&n_dist);
        let dir = Vec3::new(n_undist.x, n_undist.y, 1.0);
        dir / dir.norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_camera() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics {
                fx: 800.0,
                fy: 780.0,
                cx: 640.0,
                cy: 360.0,
                skew: 0.0,
            },
            BrownConrady5 {
                k1: -0.2,
                k2: 0.05,
                k3: 0.0,
                p1: 0.001,
                p2: -0.001,
                iters: 10,
            },
        )
    }

    #[test]
    fn project_backproject_consistency() {
        let cam = make_camera();
        let p = Pt3::new(0.12, -0.08, 1.4);

        let pixel = cam.project_point(&p).unwrap();
        let ray = cam.backproject_pixel(&pixel);

        // The ray must pass through the original point.
        let t = p.z / ray.z;
        let hit = ray * t;
        assert!((hit - p.coords).norm() < 1e-7, "ray misses the point");
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = make_camera();
        assert!(cam.project_point(&Pt3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cam.project_point(&Pt3::new(0.1, 0.1, 0.0)).is_none());
    }

    #[test]
    fn backprojected_rays_are_unit_length() {
        let cam = make_camera();
        let ray = cam.backproject_pixel(&Pt2::new(100.0, 600.0));
        assert!((ray.norm() - 1.0).abs() < 1e-12);
    }
}
