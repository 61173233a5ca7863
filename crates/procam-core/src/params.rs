//! Scan parameters, immutable for the lifetime of a session.

use serde::{Deserialize, Serialize};

use crate::math::{Pt2, Pt3, Real};

/// Which projector axes are temporally Gray-coded during a scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeAxes {
    /// Vertical stripes only; decodes projector columns.
    Columns,
    /// Horizontal stripes only; decodes projector rows.
    Rows,
    /// Both axes; enables the two-plane consistency check.
    #[default]
    Both,
}

impl CodeAxes {
    pub fn has_columns(self) -> bool {
        matches!(self, CodeAxes::Columns | CodeAxes::Both)
    }

    pub fn has_rows(self) -> bool {
        matches!(self, CodeAxes::Rows | CodeAxes::Both)
    }
}

/// Immutable per-run scanner configuration.
///
/// Distances (`square_size`, depth limits, thresholds on distances) are in
/// world units, millimetres throughout the defaults. Intensity thresholds are
/// in 8-bit intensity levels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanParams {
    /// Camera frame width in pixels.
    pub cam_width: u32,
    /// Camera frame height in pixels.
    pub cam_height: u32,
    /// Projector width in pixels.
    pub proj_width: u32,
    /// Projector height in pixels.
    pub proj_height: u32,

    /// Inner corner count along the board X axis.
    pub board_cols: u32,
    /// Inner corner count along the board Y axis.
    pub board_rows: u32,
    /// Checkerboard square side length in world units.
    pub square_size: Real,
    /// Number of board poses captured per intrinsic calibration run.
    pub board_views: usize,

    /// Gray-coded axes.
    pub axes: CodeAxes,
    /// Minimum direct-vs-inverse contrast δ for a confident bit decision.
    pub contrast_threshold: u8,
    /// Minimum absolute brightness β; darker pixel pairs are invalid.
    pub min_brightness: u8,

    /// Background subtraction distance threshold τ_bg.
    pub background_threshold: Real,
    /// Valid reconstruction depth range, lower bound.
    pub z_min: Real,
    /// Valid reconstruction depth range, upper bound.
    pub z_max: Real,
    /// Maximum allowed distance between the column-plane and row-plane
    /// intersections of one camera ray (ε).
    pub max_ray_plane_gap: Real,

    /// Mean reprojection error bound for accepting a calibration, in pixels.
    pub max_reproj_error: Real,
    /// Sampson distance bound for the epipolar filter, in pixels.
    pub max_sampson_distance: Real,

    /// Mid-session retry count for unavailable frames.
    pub frame_retries: u32,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            cam_width: 1024,
            cam_height: 768,
            proj_width: 1024,
            proj_height: 768,
            board_cols: 8,
            board_rows: 6,
            square_size: 30.0,
            board_views: 15,
            axes: CodeAxes::Both,
            contrast_threshold: 20,
            min_brightness: 40,
            background_threshold: 5.0,
            z_min: 100.0,
            z_max: 2000.0,
            max_ray_plane_gap: 2.0,
            max_reproj_error: 2.0,
            max_sampson_distance: 3.0,
            frame_retries: 3,
        }
    }
}

impl ScanParams {
    /// Number of camera pixels.
    pub fn cam_pixels(&self) -> usize {
        (self.cam_width as usize) * (self.cam_height as usize)
    }

    /// Number of inner board corners.
    pub fn board_corner_count(&self) -> usize {
        (self.board_cols as usize) * (self.board_rows as usize)
    }

    /// Board inner corners as planar world coordinates (Z = 0), row-major.
    pub fn board_grid(&self) -> Vec<Pt2> {
        let mut points = Vec::with_capacity(self.board_corner_count());
        for j in 0..self.board_rows {
            for i in 0..self.board_cols {
                points.push(Pt2::new(
                    i as Real * self.square_size,
                    j as Real * self.square_size,
                ));
            }
        }
        points
    }

    /// Board inner corners as 3D world points on the Z = 0 plane, row-major.
    pub fn board_points(&self) -> Vec<Pt3> {
        self.board_grid()
            .into_iter()
            .map(|p| Pt3::new(p.x, p.y, 0.0))
            .collect()
    }
}
