//! Ray-plane triangulation of decoded correspondences.
//!
//! Every valid camera pixel contributes one candidate point: the intersection
//! of its viewing ray with the decoded projector column plane and row plane.
//! With both axes coded the two intersections must agree to within the
//! configured gap; their midpoint is reported. Depth gating and background
//! subtraction run before a point enters the cloud.

use procam_core::{
    CorrespondenceMap, Image, Mat3, PointCloud, Pt2, Pt3, Real, Rgb8, ScanPoint, Vec3,
};

use crate::background::BackgroundModel;
use crate::geometry::GeometryTables;
use procam_linear::sampson_distance;

/// Output of triangulating one scan.
#[derive(Debug)]
pub struct ScanReconstruction {
    pub cloud: PointCloud,
    /// Reconstructed depth per camera pixel, `+inf` where no point was made.
    pub depth_map: Image<Real>,
    /// Unit projector ray toward the reconstructed point, indexed by the
    /// source camera pixel.
    pub proj_rays: Vec<Option<Vec3>>,
}

/// Triangulation thresholds, extracted from the scan parameters.
#[derive(Debug, Clone, Copy)]
pub struct TriangulationLimits {
    /// Maximum distance between the column-plane and row-plane hits.
    pub max_ray_plane_gap: Real,
    pub z_min: Real,
    pub z_max: Real,
    /// Background coincidence threshold.
    pub background_threshold: Real,
}

impl From<&procam_core::ScanParams> for TriangulationLimits {
    fn from(p: &procam_core::ScanParams) -> Self {
        Self {
            max_ray_plane_gap: p.max_ray_plane_gap,
            z_min: p.z_min,
            z_max: p.z_max,
            background_threshold: p.background_threshold,
        }
    }
}

/// Triangulate a decoded correspondence map into a coloured point cloud.
///
/// Pixels flagged invalid by the decoder never produce points. With both axes
/// coded, a pixel whose codes disagree by more than the allowed gap is
/// dropped; a pixel where only one axis decoded falls back to the single
/// available plane and is marked unreliable. Points outside `[z_min, z_max]`
/// or within the background threshold of a populated background are dropped.
pub fn triangulate(
    map: &CorrespondenceMap,
    tables: &GeometryTables,
    light: &Rgb8,
    background: Option<&BackgroundModel>,
    limits: &TriangulationLimits,
) -> ScanReconstruction {
    let width = map.width();
    let height = map.height();

    let mut cloud = PointCloud::new(width, height);
    let mut depth_map = Image::new(width, height, Real::INFINITY);
    let mut proj_rays: Vec<Option<Vec3>> = vec![None; (width as usize) * (height as usize)];

    let both_coded = map.axes().has_columns() && map.axes().has_rows();

    for y in 0..height {
        for x in 0..width {
            let ray = tables.camera_ray(x, y);

            let col_hit = map
                .column(x, y)
                .map(|c| tables.column_plane(c).intersect_camera_ray(ray));
            let row_hit = map
                .row(x, y)
                .map(|r| tables.row_plane(r).intersect_camera_ray(ray));

            // A decoded axis whose plane intersection fails geometrically
            // (grazing or behind the camera) kills the pixel outright.
            let (point, reliable) = match (col_hit, row_hit) {
                (Some(Some(pc)), Some(Some(pr))) => {
                    if (pc - pr).norm() > limits.max_ray_plane_gap {
                        continue;
                    }
                    (Pt3::from((pc.coords + pr.coords) * 0.5), true)
                }
                (Some(Some(pc)), None) => (pc, !both_coded),
                (None, Some(Some(pr))) => (pr, !both_coded),
                (None, None) => continue,
                _ => continue,
            };

            let z = point.z;
            if z < limits.z_min || z > limits.z_max {
                continue;
            }
            if let Some(bg) = background {
                if bg.is_populated() && (z - bg.depth(x, y)).abs() <= limits.background_threshold {
                    continue;
                }
            }

            let idx = (y as usize) * (width as usize) + x as usize;
            let toward = point.coords - tables.projector_center().coords;
            let norm = toward.norm();
            if norm > 1e-12 {
                proj_rays[idx] = Some(toward / norm);
            }
            depth_map.set(x, y, z);
            cloud.set(
                x,
                y,
                ScanPoint {
                    position: point,
                    color: *light.get(x, y),
                    reliable,
                },
            );
        }
    }

    ScanReconstruction {
        cloud,
        depth_map,
        proj_rays,
    }
}

/// Invalidate correspondences violating the epipolar constraint.
///
/// Only pixels with both codes decoded form a projector pixel and can be
/// tested; the rest pass through. Returns the number of invalidated pixels.
pub fn apply_epipolar_filter(map: &mut CorrespondenceMap, f: &Mat3, threshold: Real) -> usize {
    let mut dropped = 0;
    for y in 0..map.height() {
        for x in 0..map.width() {
            let (Some(c), Some(r)) = (map.column(x, y), map.row(x, y)) else {
                continue;
            };
            let cam = Pt2::new(x as Real, y as Real);
            let proj = Pt2::new(c as Real, r as Real);
            if sampson_distance(f, &cam, &proj) > threshold {
                map.invalidate(x, y);
                dropped += 1;
            }
        }
    }
    dropped
}
