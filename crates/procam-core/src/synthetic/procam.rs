//! Synthetic projector-camera scenes.
//!
//! A [`ProcamScene`] holds ground-truth calibration for both devices and can
//! simulate scanning an analytic surface: it produces the correspondence map
//! an ideal decoder would output and the camera view of any projected
//! pattern. Surfaces are depth callbacks: given a camera-frame unit ray they
//! return the ray parameter `t` of the hit, or `None` for a miss.

use crate::calib::ProCamExtrinsics;
use crate::correspondence::CorrespondenceMap;
use crate::image::Gray8;
use crate::math::{Pt2, Pt3, Real, Vec3};
use crate::models::PinholeCamera;
use crate::params::ScanParams;

/// Ground-truth scene: camera at the origin, projector posed by `extrinsics`.
#[derive(Clone, Debug)]
pub struct ProcamScene {
    pub camera: PinholeCamera,
    pub projector: PinholeCamera,
    pub extrinsics: ProCamExtrinsics,
}

/// Output of simulating one scan of an analytic surface.
#[derive(Debug)]
pub struct SimulatedScan {
    pub map: CorrespondenceMap,
    /// Ground-truth surface point per camera pixel.
    pub truth: Vec<Option<Pt3>>,
}

impl ProcamScene {
    /// Unit viewing ray of a camera pixel, through the pixel centre.
    pub fn camera_ray(&self, x: u32, y: u32) -> Vec3 {
        self.camera.backproject_pixel(&Pt2::new(x as Real, y as Real))
    }

    /// Project a camera-frame point into the projector image.
    pub fn project_into_projector(&self, p_cam: &Pt3) -> Option<Pt2> {
        let p_proj = self.extrinsics.camera_to_projector(p_cam);
        self.projector.project_point(&p_proj)
    }

    /// Simulate an ideal decode of a scan of `surface`.
    ///
    /// Decoded codes are the rounded projector coordinates of each surface
    /// hit; pixels whose hit lands outside the projector frustum stay
    /// invalid, exactly as shadowed pixels would.
    pub fn simulate_scan<S>(&self, params: &ScanParams, surface: S) -> SimulatedScan
    where
        S: Fn(&Vec3) -> Option<Real>,
    {
        let mut map = CorrespondenceMap::new(params.cam_width, params.cam_height, params.axes);
        let mut truth = vec![None; params.cam_pixels()];

        for y in 0..params.cam_height {
            for x in 0..params.cam_width {
                let ray = self.camera_ray(x, y);
                let Some(t) = surface(&ray) else {
                    continue;
                };
                if t <= 0.0 {
                    continue;
                }
                let hit = Pt3::from(ray * t);
                let Some(pp) = self.project_into_projector(&hit) else {
                    continue;
                };

                let col = pp.x.round();
                let row = pp.y.round();
                if col < 0.0
                    || row < 0.0
                    || col >= params.proj_width as Real
                    || row >= params.proj_height as Real
                {
                    continue;
                }

                if params.axes.has_columns() {
                    map.set_column(x, y, col as u32);
                }
                if params.axes.has_rows() {
                    map.set_row(x, y, row as u32);
                }
                truth[(y as usize) * (params.cam_width as usize) + x as usize] = Some(hit);
            }
        }

        SimulatedScan { map, truth }
    }

    /// Render the camera view of one projected pattern on `surface`.
    ///
    /// Pixels that see no projector light (miss, frustum, or a black pattern
    /// stripe) receive only `ambient`.
    pub fn render_projection<S>(
        &self,
        params: &ScanParams,
        surface: &S,
        pattern: &Gray8,
        ambient: u8,
    ) -> Gray8
    where
        S: Fn(&Vec3) -> Option<Real>,
    {
        let mut frame = Gray8::new(params.cam_width, params.cam_height, ambient);
        for y in 0..params.cam_height {
            for x in 0..params.cam_width {
                let ray = self.camera_ray(x, y);
                let Some(t) = surface(&ray) else {
                    continue;
                };
                if t <= 0.0 {
                    continue;
                }
                let hit = Pt3::from(ray * t);
                let Some(pp) = self.project_into_projector(&hit) else {
                    continue;
                };
                let px = pp.x.round() as i64;
                let py = pp.y.round() as i64;
                if !pattern.in_bounds(px, py) {
                    continue;
                }
                let lit = *pattern.get(px as u32, py as u32) as u16;
                let value = (ambient as u16 + lit).min(255) as u8;
                frame.set(x, y, value);
            }
        }
        frame
    }
}

/// Depth callback for the plane `z = z0` (camera frame).
pub fn plane_surface(z0: Real) -> impl Fn(&Vec3) -> Option<Real> {
    move |ray: &Vec3| {
        if ray.z <= 1e-12 {
            return None;
        }
        Some(z0 / ray.z)
    }
}
