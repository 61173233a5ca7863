//! Per-pixel camera rays and per-column/row projector planes.
//!
//! Triangulation reduces to ray-plane intersections once these tables exist.
//! They are a pure function of the calibration record and are rebuilt whenever
//! any calibration field changes; the session caches them in between.

use procam_core::{Pt2, Pt3, ProCamCalibration, Real, ScanParams, Vec3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeometryError {
    /// The calibration record lacks intrinsics or extrinsics.
    #[error("geometry tables require a full projector-camera calibration")]
    CalibrationMissing,
    /// A projector column or row produced parallel ray directions.
    #[error("degenerate projector plane at {axis} {index}")]
    DegeneratePlane { axis: &'static str, index: u32 },
}

/// A plane `n . x + d = 0` in the camera frame, with unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub offset: Real,
}

impl Plane {
    /// Plane through a point with the given (not necessarily unit) normal.
    pub fn from_point_normal(point: &Pt3, normal: &Vec3) -> Option<Self> {
        let norm = normal.norm();
        if norm < 1e-12 {
            return None;
        }
        let n = normal / norm;
        Some(Self {
            normal: n,
            offset: -n.dot(&point.coords),
        })
    }

    /// Signed distance of a point from the plane.
    pub fn signed_distance(&self, p: &Pt3) -> Real {
        self.normal.dot(&p.coords) + self.offset
    }

    /// Intersect with a ray from the camera centre (the origin).
    ///
    /// Returns `None` for rays parallel to the plane or hits behind the
    /// camera.
    pub fn intersect_camera_ray(&self, dir: &Vec3) -> Option<Pt3> {
        let denom = self.normal.dot(dir);
        if denom.abs() < 1e-12 {
            return None;
        }
        let t = -self.offset / denom;
        if t <= 0.0 {
            return None;
        }
        Some(Pt3::from(dir * t))
    }
}

/// Precomputed viewing rays and projector planes, all in the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryTables {
    cam_width: u32,
    cam_height: u32,
    /// Unit viewing ray per camera pixel, row-major.
    cam_rays: Vec<Vec3>,
    /// One plane per projector column.
    col_planes: Vec<Plane>,
    /// One plane per projector row.
    row_planes: Vec<Plane>,
    /// Projector centre in the camera frame.
    projector_center: Pt3,
}

impl GeometryTables {
    pub fn cam_width(&self) -> u32 {
        self.cam_width
    }

    pub fn cam_height(&self) -> u32 {
        self.cam_height
    }

    pub fn projector_center(&self) -> &Pt3 {
        &self.projector_center
    }

    /// Unit viewing ray of a camera pixel.
    pub fn camera_ray(&self, x: u32, y: u32) -> &Vec3 {
        &self.cam_rays[(y as usize) * (self.cam_width as usize) + x as usize]
    }

    pub fn column_plane(&self, column: u32) -> &Plane {
        &self.col_planes[column as usize]
    }

    pub fn row_plane(&self, row: u32) -> &Plane {
        &self.row_planes[row as usize]
    }

    pub fn column_count(&self) -> usize {
        self.col_planes.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_planes.len()
    }
}

/// Build the ray and plane tables from a complete calibration.
///
/// Deterministic in its inputs: calling it twice with the same record yields
/// bit-identical tables.
pub fn evaluate_procam_geometry(
    params: &ScanParams,
    calib: &ProCamCalibration,
) -> Result<GeometryTables, GeometryError> {
    let cam = calib
        .camera()
        .ok_or(GeometryError::CalibrationMissing)?
        .camera();
    let proj = calib
        .projector()
        .ok_or(GeometryError::CalibrationMissing)?
        .camera();
    let ext = calib
        .extrinsics()
        .ok_or(GeometryError::CalibrationMissing)?;

    let projector_center = ext.projector_center();

    let mut cam_rays = Vec::with_capacity(params.cam_pixels());
    for y in 0..params.cam_height {
        for x in 0..params.cam_width {
            cam_rays.push(cam.backproject_pixel(&Pt2::new(x as Real, y as Real)));
        }
    }

    // A projector column x is the plane swept by all projector rays with
    // u = x: two rays at different v's span it, anchored at the projector
    // centre. Rays are undistorted in the projector model, then rotated into
    // the camera frame.
    let v_low = 0.0;
    let v_high = (params.proj_height.max(2) - 1) as Real;
    let mut col_planes = Vec::with_capacity(params.proj_width as usize);
    for x in 0..params.proj_width {
        let d1 = ext.projector_dir_to_camera(&proj.backproject_pixel(&Pt2::new(x as Real, v_low)));
        let d2 = ext.projector_dir_to_camera(&proj.backproject_pixel(&Pt2::new(x as Real, v_high)));
        let plane = Plane::from_point_normal(&projector_center, &d1.cross(&d2)).ok_or(
            GeometryError::DegeneratePlane {
                axis: "column",
                index: x,
            },
        )?;
        col_planes.push(plane);
    }

    let u_low = 0.0;
    let u_high = (params.proj_width.max(2) - 1) as Real;
    let mut row_planes = Vec::with_capacity(params.proj_height as usize);
    for y in 0..params.proj_height {
        let d1 = ext.projector_dir_to_camera(&proj.backproject_pixel(&Pt2::new(u_low, y as Real)));
        let d2 = ext.projector_dir_to_camera(&proj.backproject_pixel(&Pt2::new(u_high, y as Real)));
        let plane = Plane::from_point_normal(&projector_center, &d1.cross(&d2)).ok_or(
            GeometryError::DegeneratePlane {
                axis: "row",
                index: y,
            },
        )?;
        row_planes.push(plane);
    }

    Ok(GeometryTables {
        cam_width: params.cam_width,
        cam_height: params.cam_height,
        cam_rays,
        col_planes,
        row_planes,
        projector_center,
    })
}
