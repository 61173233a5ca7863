//! Distortion estimation and joint intrinsics refinement.
//!
//! Zhang's closed-form method assumes distortion-free observations, so
//! intrinsics and Brown-Conrady coefficients are estimated by alternation:
//!
//! 1. initial K from the raw (distorted) pixels,
//! 2. distortion from the homography residuals under the current K,
//! 3. undistort the raw pixels and re-estimate K,
//! 4. repeat 2-3.
//!
//! A couple of rounds suffice; the scheme is linear throughout and needs no
//! ground-truth distortion preprocessing.

use nalgebra::{DMatrix, DVector};
use procam_core::{BrownConrady5, Intrinsics, Mat3, Pt2, Real, Vec2};
use thiserror::Error;

use crate::homography::{apply_homography, dlt_homography, HomographyError};
use crate::zhang::{intrinsics_from_homographies, ZhangError};

#[derive(Debug, Error)]
pub enum DistortionFitError {
    #[error("need at least {needed} points for distortion estimation, got {got}")]
    NotEnoughPoints { needed: usize, got: usize },
    #[error("svd failed during distortion estimation")]
    SvdFailed,
    #[error("degenerate configuration: no radial diversity")]
    Degenerate,
}

#[derive(Debug, Error)]
pub enum IntrinsicsFitError {
    #[error("need at least 3 views, got {0}")]
    NotEnoughViews(usize),
    #[error("view {view} has {board} board points but {pixels} pixels")]
    PointCountMismatch {
        view: usize,
        board: usize,
        pixels: usize,
    },
    #[error(transparent)]
    Homography(#[from] HomographyError),
    #[error(transparent)]
    Zhang(#[from] ZhangError),
    #[error(transparent)]
    Distortion(#[from] DistortionFitError),
}

/// Options controlling distortion coefficient estimation.
#[derive(Debug, Clone, Copy)]
pub struct DistortionFitOptions {
    /// Fix tangential coefficients (p1, p2) to zero.
    pub fix_tangential: bool,
    /// Fix the r^6 radial coefficient to zero. The k3 term overfits with
    /// typical calibration data; keep it fixed unless the lens is wide-angle.
    pub fix_k3: bool,
    /// Undistortion iteration count stored on the returned model.
    pub iters: u32,
}

impl Default for DistortionFitOptions {
    fn default() -> Self {
        Self {
            fix_tangential: false,
            fix_k3: true,
            iters: 8,
        }
    }
}

/// One planar calibration view: board-plane coordinates (Z=0) and the raw
/// (distorted) pixel observations of the same corners.
#[derive(Debug, Clone)]
pub struct PlanarView {
    pub board: Vec<Pt2>,
    pub pixels: Vec<Pt2>,
}

/// Estimate Brown-Conrady coefficients from homography residuals.
///
/// `homographies[i]` must map `views[i].board` onto the pixel observations;
/// the residual between the homography prediction and the observation is
/// attributed to distortion and solved linearly.
pub fn fit_distortion(
    intrinsics: &Intrinsics,
    views: &[PlanarView],
    homographies: &[Mat3],
    opts: DistortionFitOptions,
) -> Result<BrownConrady5, DistortionFitError> {
    let total_points: usize = views.iter().map(|v| v.board.len()).sum();

    let n_params: usize = match (opts.fix_tangential, opts.fix_k3) {
        (true, true) => 2,
        (true, false) => 3,
        (false, true) => 4,
        (false, false) => 5,
    };
    let min_points = n_params.div_ceil(2) + 2;
    if total_points < min_points {
        return Err(DistortionFitError::NotEnoughPoints {
            needed: min_points,
            got: total_points,
        });
    }

    let mut a = DMatrix::<Real>::zeros(2 * total_points, n_params);
    let mut b = DVector::<Real>::zeros(2 * total_points);

    let mut max_r2 = 0.0;
    let mut row = 0;
    for (view, h) in views.iter().zip(homographies.iter()) {
        for (board_pt, pixel_obs) in view.board.iter().zip(&view.pixels) {
            let pixel_ideal = apply_homography(h, board_pt);
            let n_ideal = intrinsics.pixel_to_normalized(&pixel_ideal);
            let n_obs = intrinsics.pixel_to_normalized(pixel_obs);

            let residual = n_obs - n_ideal;

            let x = n_ideal.x;
            let y = n_ideal.y;
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            max_r2 = r2.max(max_r2);

            let mut col = 0;
            a[(row, col)] = x * r2;
            a[(row + 1, col)] = y * r2;
            col += 1;

            a[(row, col)] = x * r4;
            a[(row + 1, col)] = y * r4;
            col += 1;

            if !opts.fix_k3 {
                let r6 = r4 * r2;
                a[(row, col)] = x * r6;
                a[(row + 1, col)] = y * r6;
                col += 1;
            }

            if !opts.fix_tangential {
                let xy = x * y;
                a[(row, col)] = 2.0 * xy;
                a[(row + 1, col)] = r2 + 2.0 * y * y;
                col += 1;
                a[(row, col)] = r2 + 2.0 * x * x;
                a[(row + 1, col)] = 2.0 * xy;
            }

            b[row] = residual.x;
            b[row + 1] = residual.y;
            row += 2;
        }
    }

    if max_r2 < 1e-6 {
        return Err(DistortionFitError::Degenerate);
    }

    let svd = a.svd(true, true);
    let x = svd
        .solve(&b, 1e-10)
        .map_err(|_| DistortionFitError::SvdFailed)?;

    let mut col = 0;
    let k1 = x[col];
    col += 1;
    let k2 = x[col];
    col += 1;
    let k3 = if opts.fix_k3 {
        0.0
    } else {
        let v = x[col];
        col += 1;
        v
    };
    let (p1, p2) = if opts.fix_tangential {
        (0.0, 0.0)
    } else {
        (x[col], x[col + 1])
    };

    Ok(BrownConrady5 {
        k1,
        k2,
        k3,
        p1,
        p2,
        iters: opts.iters,
    })
}

/// Options for the alternating intrinsics + distortion estimation.
#[derive(Debug, Clone, Copy)]
pub struct IntrinsicsFitOptions {
    /// Number of distortion/K alternation rounds. 1-3 is typical.
    pub refine_iterations: usize,
    pub distortion: DistortionFitOptions,
    /// Force skew to zero after each K estimate.
    pub zero_skew: bool,
}

impl Default for IntrinsicsFitOptions {
    fn default() -> Self {
        Self {
            refine_iterations: 2,
            distortion: DistortionFitOptions::default(),
            zero_skew: true,
        }
    }
}

/// Joint estimate of intrinsics and distortion.
#[derive(Debug, Clone, Copy)]
pub struct IntrinsicsEstimate {
    pub intrinsics: Intrinsics,
    pub distortion: BrownConrady5,
}

fn undistort_pixels(
    pixels: &[Pt2],
    intrinsics: &Intrinsics,
    distortion: &BrownConrady5,
) -> Vec<Pt2> {
    pixels
        .iter()
        .map(|p| {
            let n_dist = intrinsics.pixel_to_normalized(p);
            let n_undist = distortion.undistort(&n_dist);
            intrinsics.normalized_to_pixel(&Vec2::new(n_undist.x, n_undist.y))
        })
        .collect()
}

fn homographies_for(
    views: &[PlanarView],
    pixels_per_view: &[Vec<Pt2>],
) -> Result<Vec<Mat3>, HomographyError> {
    views
        .iter()
        .zip(pixels_per_view.iter())
        .map(|(view, pixels)| dlt_homography(&view.board, pixels))
        .collect()
}

/// Estimate intrinsics and distortion by alternating linear solves.
pub fn estimate_intrinsics(
    views: &[PlanarView],
    opts: &IntrinsicsFitOptions,
) -> Result<IntrinsicsEstimate, IntrinsicsFitError> {
    if views.len() < 3 {
        return Err(IntrinsicsFitError::NotEnoughViews(views.len()));
    }
    for (i, view) in views.iter().enumerate() {
        if view.board.len() != view.pixels.len() {
            return Err(IntrinsicsFitError::PointCountMismatch {
                view: i,
                board: view.board.len(),
                pixels: view.pixels.len(),
            });
        }
    }

    let raw_pixels: Vec<Vec<Pt2>> = views.iter().map(|v| v.pixels.clone()).collect();

    // Initial K from the raw pixels, distortion ignored.
    let mut current_k = intrinsics_from_homographies(&homographies_for(views, &raw_pixels)?)?;
    if opts.zero_skew {
        current_k.skew = 0.0;
    }
    let mut current_dist = BrownConrady5 {
        iters: opts.distortion.iters,
        ..BrownConrady5::default()
    };

    for _ in 0..opts.refine_iterations {
        // Homographies under the current distortion estimate.
        let corrected: Vec<Vec<Pt2>> = raw_pixels
            .iter()
            .map(|pixels| undistort_pixels(pixels, &current_k, &current_dist))
            .collect();
        let homographies = homographies_for(views, &corrected)?;

        // Distortion from the residuals against the raw observations.
        current_dist = fit_distortion(&current_k, views, &homographies, opts.distortion)?;

        // Undistort with the new coefficients and re-estimate K.
        let corrected: Vec<Vec<Pt2>> = raw_pixels
            .iter()
            .map(|pixels| undistort_pixels(pixels, &current_k, &current_dist))
            .collect();
        current_k = intrinsics_from_homographies(&homographies_for(views, &corrected)?)?;
        if opts.zero_skew {
            current_k.skew = 0.0;
        }
    }

    Ok(IntrinsicsEstimate {
        intrinsics: current_k,
        distortion: current_dist,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Rotation3, Translation3, Vector3};
    use procam_core::{PinholeCamera, Pt3};

    fn board_7x7() -> Vec<Pt2> {
        let mut pts = Vec::new();
        for j in 0..7 {
            for i in 0..7 {
                pts.push(Pt2::new(i as Real * 30.0, j as Real * 30.0));
            }
        }
        pts
    }

    fn synthetic_views(camera: &PinholeCamera, n_views: usize) -> Vec<PlanarView> {
        let board = board_7x7();
        let poses = [
            (
                Rotation3::from_euler_angles(0.1, 0.0, 0.05),
                Vector3::new(-100.0, -50.0, 1000.0),
            ),
            (
                Rotation3::from_euler_angles(-0.05, 0.15, -0.1),
                Vector3::new(-50.0, -100.0, 1200.0),
            ),
            (
                Rotation3::from_euler_angles(0.2, -0.1, 0.0),
                Vector3::new(-80.0, -80.0, 900.0),
            ),
            (
                Rotation3::from_euler_angles(0.0, 0.2, 0.1),
                Vector3::new(-120.0, -60.0, 1100.0),
            ),
            (
                Rotation3::from_euler_angles(-0.1, 0.1, -0.05),
                Vector3::new(-60.0, -120.0, 1050.0),
            ),
        ];

        poses
            .iter()
            .take(n_views)
            .map(|(rot, t)| {
                let iso = Isometry3::from_parts(Translation3::from(*t), (*rot).into());
                let pixels = board
                    .iter()
                    .map(|bp| {
                        let p3d = iso.transform_point(&Pt3::new(bp.x, bp.y, 0.0));
                        camera.project_point(&p3d).expect("board in front of camera")
                    })
                    .collect();
                PlanarView {
                    board: board.clone(),
                    pixels,
                }
            })
            .collect()
    }

    #[test]
    fn distortion_free_views_give_exact_intrinsics() {
        let intr_gt = Intrinsics {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        };
        let camera = PinholeCamera::new(intr_gt, BrownConrady5::none());
        let views = synthetic_views(&camera, 4);

        let est = estimate_intrinsics(&views, &IntrinsicsFitOptions::default()).unwrap();

        assert!((est.intrinsics.fx - intr_gt.fx).abs() < 0.5);
        assert!((est.intrinsics.fy - intr_gt.fy).abs() < 0.5);
        assert!((est.intrinsics.cx - intr_gt.cx).abs() < 1.0);
        assert!((est.intrinsics.cy - intr_gt.cy).abs() < 1.0);
        assert!(est.distortion.k1.abs() < 1e-3);
    }

    #[test]
    fn radial_distortion_sign_is_recovered() {
        let intr_gt = Intrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        };
        let dist_gt = BrownConrady5 {
            k1: -0.2,
            k2: 0.05,
            k3: 0.0,
            p1: 0.0,
            p2: 0.0,
            iters: 10,
        };
        let camera = PinholeCamera::new(intr_gt, dist_gt);
        let views = synthetic_views(&camera, 5);

        let opts = IntrinsicsFitOptions {
            refine_iterations: 3,
            distortion: DistortionFitOptions {
                fix_tangential: true,
                fix_k3: true,
                iters: 8,
            },
            zero_skew: true,
        };
        let est = estimate_intrinsics(&views, &opts).unwrap();

        assert_eq!(est.distortion.k1.signum(), dist_gt.k1.signum());
        // Linear alternation: coarse accuracy is expected, exactness is not.
        let fx_err = (est.intrinsics.fx - intr_gt.fx).abs() / intr_gt.fx;
        assert!(fx_err < 0.4, "fx relative error {}", fx_err);
    }

    #[test]
    fn mismatched_views_are_rejected() {
        let views = vec![
            PlanarView {
                board: vec![Pt2::new(0.0, 0.0); 5],
                pixels: vec![Pt2::new(0.0, 0.0); 4],
            };
            3
        ];
        assert!(matches!(
            estimate_intrinsics(&views, &IntrinsicsFitOptions::default()),
            Err(IntrinsicsFitError::PointCountMismatch { view: 0, .. })
        ));
    }
}
