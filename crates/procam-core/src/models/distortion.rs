use serde::{Deserialize, Serialize};

use crate::math::{Real, Vec2};

/// Brown-Conrady distortion with three radial and two tangential coefficients.
///
/// `distort` is the closed-form model; `undistort` inverts it by fixed-point
/// iteration (`iters` rounds, 8 when left at 0).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: Real,
    pub k2: Real,
    pub k3: Real,
    pub p1: Real,
    pub p2: Real,
    pub iters: u32,
}

impl BrownConrady5 {
    /// All-zero coefficients (identity mapping).
    pub fn none() -> Self {
        Self {
            iters: 8,
            ..Self::default()
        }
    }

    /// Coefficients as the 5-vector `[k1, k2, p1, p2, k3]` used on disk.
    pub fn as_vector(&self) -> [Real; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Rebuild from the on-disk 5-vector layout.
    pub fn from_vector(v: &[Real; 5]) -> Self {
        Self {
            k1: v[0],
            k2: v[1],
            p1: v[2],
            p2: v[3],
            k3: v[4],
            iters: 8,
        }
    }

    fn distort_impl(&self, x: Real, y: Real) -> (Real, Real) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;

        let xy = x * y;
        let x_tan = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;

        (x * radial + x_tan, y * radial + y_tan)
    }

    /// Apply distortion to undistorted normalized coordinates.
    pub fn distort(&self, n_undist: &Vec2) -> Vec2 {
        let (xd, yd) = self.distort_impl(n_undist.x, n_undist.y);
        Vec2::new(xd, yd)
    }

    /// Remove distortion from observed normalized coordinates.
    pub fn undistort(&self, n_dist: &Vec2) -> Vec2 {
        let mut x = n_dist.x;
        let mut y = n_dist.y;

        let iters = if self.iters == 0 { 8 } else { self.iters };
        for _ in 0..iters {
            let (xd, yd) = self.distort_impl(x, y);
            x -= xd - n_dist.x;
            y -= yd - n_dist.y;
        }
        Vec2::new(x, y)
    }
}
