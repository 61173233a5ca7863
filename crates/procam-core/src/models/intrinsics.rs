use serde::{Deserialize, Serialize};

use crate::math::{Mat3, Pt2, Real, Vec2};

/// Standard pinhole intrinsics with optional skew.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length in pixels along X.
    pub fx: Real,
    /// Focal length in pixels along Y.
    pub fy: Real,
    /// Principal point X coordinate in pixels.
    pub cx: Real,
    /// Principal point Y coordinate in pixels.
    pub cy: Real,
    /// Skew term (typically 0).
    pub skew: Real,
}

impl Intrinsics {
    /// Return the 3x3 camera intrinsics matrix K.
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, self.skew, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    /// Build intrinsics from a K matrix.
    pub fn from_k_matrix(k: &Mat3) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: k[(0, 1)],
        }
    }

    /// Map normalized image-plane coordinates (Z=1) to pixel coordinates.
    pub fn normalized_to_pixel(&self, n: &Vec2) -> Pt2 {
        let u = self.fx * n.x + self.skew * n.y + self.cx;
        let v = self.fy * n.y + self.cy;
        Pt2::new(u, v)
    }

    /// Map pixel coordinates to normalized image-plane coordinates (Z=1).
    ///
    /// Closed-form inverse of [`Intrinsics::normalized_to_pixel`]; no matrix
    /// inversion involved.
    pub fn pixel_to_normalized(&self, pixel: &Pt2) -> Vec2 {
        let ny = (pixel.y - self.cy) / self.fy;
        let nx = (pixel.x - self.cx - self.skew * ny) / self.fx;
        Vec2::new(nx, ny)
    }
}
