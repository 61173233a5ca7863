//! Fundamental matrix estimation between the camera and projector images.
//!
//! The normalized eight-point algorithm with rank-2 enforcement, the Sampson
//! distance used by the epipolar filter, and a RANSAC wrapper for fitting
//! against decoded correspondences (which contain outliers near depth
//! discontinuities).

use nalgebra::DMatrix;
use procam_core::{ransac, Estimator, Mat3, Pt2, RansacEstimate, RansacOptions, Real, Vec3};
use thiserror::Error;

use crate::homography::smallest_singular_vector;

#[derive(Debug, Error)]
pub enum EpipolarError {
    #[error("need at least 8 correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate point configuration")]
    Degenerate,
}

/// Hartley normalization shared with the homography solver, returning the
/// similarity transform as a matrix.
fn normalize(points: &[Pt2]) -> Result<(Vec<Pt2>, Mat3), EpipolarError> {
    let n = points.len() as Real;
    let cx = points.iter().map(|p| p.x).sum::<Real>() / n;
    let cy = points.iter().map(|p| p.y).sum::<Real>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;
    if mean_dist < 1e-12 {
        return Err(EpipolarError::Degenerate);
    }
    let s = (2.0 as Real).sqrt() / mean_dist;
    let t = Mat3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let pts = points
        .iter()
        .map(|p| Pt2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Ok((pts, t))
}

/// Normalized eight-point fundamental matrix.
///
/// `cam` and `proj` are corresponding pixels in the camera and projector
/// images. The result is rank-2 and satisfies `x_projᵀ F x_cam = 0` up to
/// numerical error.
pub fn fundamental_8point(cam: &[Pt2], proj: &[Pt2]) -> Result<Mat3, EpipolarError> {
    let n = cam.len();
    if n < 8 || proj.len() != n {
        return Err(EpipolarError::NotEnoughPoints(n));
    }

    let (cam_n, t_cam) = normalize(cam)?;
    let (proj_n, t_proj) = normalize(proj)?;

    let mut a = DMatrix::<Real>::zeros(n, 9);
    for (i, (pc, pp)) in cam_n.iter().zip(proj_n.iter()).enumerate() {
        let (x, y) = (pc.x, pc.y);
        let (xp, yp) = (pp.x, pp.y);
        a[(i, 0)] = xp * x;
        a[(i, 1)] = xp * y;
        a[(i, 2)] = xp;
        a[(i, 3)] = yp * x;
        a[(i, 4)] = yp * y;
        a[(i, 5)] = yp;
        a[(i, 6)] = x;
        a[(i, 7)] = y;
        a[(i, 8)] = 1.0;
    }

    let f_vec = smallest_singular_vector(a).map_err(|_| EpipolarError::SvdFailed)?;
    let f = Mat3::from_row_slice(&f_vec);
    let f = enforce_rank2(&f)?;

    // Denormalize.
    Ok(t_proj.transpose() * f * t_cam)
}

/// Zero the smallest singular value of `f`.
pub fn enforce_rank2(f: &Mat3) -> Result<Mat3, EpipolarError> {
    let svd = f.svd(true, true);
    let u = svd.u.ok_or(EpipolarError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(EpipolarError::SvdFailed)?;
    let mut s = svd.singular_values;
    s[2] = 0.0;
    Ok(u * Mat3::from_diagonal(&s) * v_t)
}

/// First-order (Sampson) approximation of the geometric epipolar error, in
/// pixels, of a camera/projector pixel pair under `f`.
pub fn sampson_distance(f: &Mat3, cam: &Pt2, proj: &Pt2) -> Real {
    let xc = Vec3::new(cam.x, cam.y, 1.0);
    let xp = Vec3::new(proj.x, proj.y, 1.0);

    let f_xc = f * xc;
    let ft_xp = f.transpose() * xp;
    let denom = f_xc.x * f_xc.x + f_xc.y * f_xc.y + ft_xp.x * ft_xp.x + ft_xp.y * ft_xp.y;
    let val = xp.dot(&f_xc);
    (val * val / denom.max(1e-12)).sqrt()
}

/// One camera/projector pixel pair.
#[derive(Debug, Clone, Copy)]
pub struct PixelPair {
    pub cam: Pt2,
    pub proj: Pt2,
}

struct FundamentalEstimator;

impl Estimator for FundamentalEstimator {
    type Datum = PixelPair;
    type Model = Mat3;

    const MIN_SAMPLES: usize = 8;

    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let cam: Vec<Pt2> = sample_indices.iter().map(|&i| data[i].cam).collect();
        let proj: Vec<Pt2> = sample_indices.iter().map(|&i| data[i].proj).collect();
        fundamental_8point(&cam, &proj).ok()
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        sampson_distance(model, &datum.cam, &datum.proj)
    }
}

/// Robust eight-point fit over noisy decoded correspondences.
pub fn fundamental_ransac(
    pairs: &[PixelPair],
    opts: &RansacOptions,
) -> Option<RansacEstimate<Mat3>> {
    ransac::<FundamentalEstimator>(pairs, opts)
}
