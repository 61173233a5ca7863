//! Camera, projector and projector-camera calibration.
//!
//! All three operations share the planar pipeline from `procam-linear`:
//! DLT homographies, Zhang's closed-form intrinsics, linear distortion
//! fitting with alternating refinement, and homography pose decomposition.
//! The projector is calibrated as an inverse camera: board corners detected
//! in the camera image are mapped into the projector image through the
//! decoded Gray-code correspondence of the same pose.
//!
//! The functions here only compute; committing results to the calibration
//! record is the session's job, which keeps each commit atomic.

use log::warn;
use procam_core::{
    BoardPose, CorrespondenceMap, DeviceIntrinsics, Iso3, Mat3, PinholeCamera, Pt2, Pt3,
    RansacEstimate, RansacOptions, Real, ScanParams,
};
use procam_linear::{
    dlt_homography, estimate_intrinsics, fundamental_ransac, pose_from_homography,
    HomographyError, IntrinsicsEstimate, IntrinsicsFitError, IntrinsicsFitOptions, PixelPair,
    PlanarView, PoseError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum projector-mapped corners for a pose to stay in the solve.
const MIN_PROJECTOR_CORNERS: usize = 4;
/// Minimum usable poses for an intrinsic solve.
const MIN_VIEWS: usize = 3;

#[derive(Debug, Error)]
pub enum CalibrationError {
    /// A pose contributed fewer corners than required.
    #[error("view {view}: {got} corners detected, need {needed}")]
    CornerDetectionInsufficient {
        view: usize,
        needed: usize,
        got: usize,
    },
    /// Too few usable poses survived for the solver.
    #[error("need at least {needed} usable views, got {got}")]
    NotEnoughViews { needed: usize, got: usize },
    /// Extrinsic calibration was requested before both intrinsics exist.
    #[error("extrinsic calibration requires both device intrinsics")]
    PrereqMissing,
    /// The solved pose does not explain the observations well enough.
    #[error("{device} mean reprojection error {error:.3} px exceeds bound {bound:.3} px")]
    ReprojectionTooLarge {
        device: &'static str,
        error: Real,
        bound: Real,
    },
    /// A solved pose places board points behind the device.
    #[error("degenerate geometry: {0}")]
    Degenerate(&'static str),
    #[error(transparent)]
    Intrinsics(#[from] IntrinsicsFitError),
    #[error(transparent)]
    Homography(#[from] HomographyError),
    #[error(transparent)]
    Pose(#[from] PoseError),
    #[error(transparent)]
    State(#[from] procam_core::CalibStateError),
}

/// Result of one device's intrinsic calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCalibrationReport {
    pub device: DeviceIntrinsics,
    /// Board pose per usable view.
    pub board_poses: Vec<BoardPose>,
    /// Mean reprojection error per usable view, in pixels.
    pub per_view_error: Vec<Real>,
    /// Mean reprojection error over all views.
    pub mean_error: Real,
}

/// Result of projector calibration, optionally with a joint camera
/// re-estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorCalibrationReport {
    pub projector: DeviceCalibrationReport,
    /// Present in simultaneous mode; committed together with the projector.
    pub camera: Option<DeviceCalibrationReport>,
}

/// Result of extrinsic projector-camera calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtrinsicCalibrationReport {
    pub extrinsics: procam_core::ProCamExtrinsics,
    pub cam_pose: BoardPose,
    pub proj_pose: BoardPose,
    pub cam_error: Real,
    pub proj_error: Real,
    /// Fundamental matrix refit from the pose's decoded correspondences.
    pub fundamental: Option<Mat3>,
}

/// One projector-calibration pose: full-board camera corners plus the decoded
/// correspondence map captured at the same board position.
#[derive(Debug, Clone)]
pub struct ProjectorView {
    pub camera_corners: Vec<Pt2>,
    pub decode: CorrespondenceMap,
}

fn undistorted_pixels(model: &PinholeCamera, pixels: &[Pt2]) -> Vec<Pt2> {
    pixels
        .iter()
        .map(|p| {
            let n = model.distortion.undistort(&model.intrinsics.pixel_to_normalized(p));
            model.intrinsics.normalized_to_pixel(&n)
        })
        .collect()
}

/// Board pose of one view under a fixed device model.
fn board_pose(
    model: &PinholeCamera,
    board: &[Pt2],
    pixels: &[Pt2],
) -> Result<Iso3, CalibrationError> {
    let undist = undistorted_pixels(model, pixels);
    let h = dlt_homography(board, &undist)?;
    Ok(pose_from_homography(&model.intrinsics.k_matrix(), &h)?)
}

/// Mean distance between observed corners and the board reprojected through
/// the full device model.
pub fn mean_reprojection_error(
    model: &PinholeCamera,
    pose: &Iso3,
    board: &[Pt2],
    observed: &[Pt2],
) -> Result<Real, CalibrationError> {
    let mut sum = 0.0;
    for (b, obs) in board.iter().zip(observed) {
        let p = pose.transform_point(&Pt3::new(b.x, b.y, 0.0));
        let projected = model
            .project_point(&p)
            .ok_or(CalibrationError::Degenerate("board point behind device"))?;
        sum += (projected - obs).norm();
    }
    Ok(sum / board.len() as Real)
}

/// Poses and reprojection statistics for a finished intrinsic estimate.
fn device_report(
    views: &[PlanarView],
    est: &IntrinsicsEstimate,
) -> Result<DeviceCalibrationReport, CalibrationError> {
    let model = PinholeCamera::new(est.intrinsics, est.distortion);

    let mut board_poses = Vec::with_capacity(views.len());
    let mut per_view_error = Vec::with_capacity(views.len());
    for view in views {
        let pose = board_pose(&model, &view.board, &view.pixels)?;
        per_view_error.push(mean_reprojection_error(&model, &pose, &view.board, &view.pixels)?);
        board_poses.push(BoardPose::from_isometry(&pose));
    }
    let mean_error = per_view_error.iter().sum::<Real>() / per_view_error.len() as Real;

    Ok(DeviceCalibrationReport {
        device: DeviceIntrinsics {
            intrinsics: est.intrinsics,
            distortion: est.distortion,
        },
        board_poses,
        per_view_error,
        mean_error,
    })
}

/// Intrinsic camera calibration from detected full-board corner sets.
pub fn calibrate_camera(
    params: &ScanParams,
    views: &[Vec<Pt2>],
) -> Result<DeviceCalibrationReport, CalibrationError> {
    if views.len() < MIN_VIEWS {
        return Err(CalibrationError::NotEnoughViews {
            needed: MIN_VIEWS,
            got: views.len(),
        });
    }
    let board = params.board_grid();
    for (i, corners) in views.iter().enumerate() {
        if corners.len() != board.len() {
            return Err(CalibrationError::CornerDetectionInsufficient {
                view: i,
                needed: board.len(),
                got: corners.len(),
            });
        }
    }

    let planar: Vec<PlanarView> = views
        .iter()
        .map(|pixels| PlanarView {
            board: board.clone(),
            pixels: pixels.clone(),
        })
        .collect();

    let est = estimate_intrinsics(&planar, &IntrinsicsFitOptions::default())?;
    device_report(&planar, &est)
}

/// Intrinsic projector calibration through decoded correspondences.
///
/// Each camera corner maps into the projector image by bilinear interpolation
/// of the decoded fields over its 3x3 neighbourhood; corners with an invalid
/// neighbourhood are dropped, and a pose keeping fewer than
/// [`MIN_PROJECTOR_CORNERS`] is rejected with a warning. In simultaneous mode
/// the camera is re-estimated from the same usable poses so both devices can
/// be committed together.
pub fn calibrate_projector(
    params: &ScanParams,
    views: &[ProjectorView],
    simultaneous: bool,
) -> Result<ProjectorCalibrationReport, CalibrationError> {
    let board = params.board_grid();

    let mut proj_views = Vec::new();
    let mut cam_views = Vec::new();
    for (i, view) in views.iter().enumerate() {
        if view.camera_corners.len() != board.len() {
            return Err(CalibrationError::CornerDetectionInsufficient {
                view: i,
                needed: board.len(),
                got: view.camera_corners.len(),
            });
        }

        let mut kept_board = Vec::new();
        let mut kept_proj = Vec::new();
        for (b, c) in board.iter().zip(&view.camera_corners) {
            if let Some(pp) = view.decode.interpolate_projector_pixel(c.x, c.y) {
                kept_board.push(*b);
                kept_proj.push(pp);
            }
        }
        if kept_proj.len() < MIN_PROJECTOR_CORNERS {
            warn!(
                "projector calibration: view {} kept {} of {} corners, skipping",
                i,
                kept_proj.len(),
                board.len()
            );
            continue;
        }

        proj_views.push(PlanarView {
            board: kept_board,
            pixels: kept_proj,
        });
        cam_views.push(PlanarView {
            board: board.clone(),
            pixels: view.camera_corners.clone(),
        });
    }

    if proj_views.len() < MIN_VIEWS {
        return Err(CalibrationError::NotEnoughViews {
            needed: MIN_VIEWS,
            got: proj_views.len(),
        });
    }

    let proj_est = estimate_intrinsics(&proj_views, &IntrinsicsFitOptions::default())?;
    let projector = device_report(&proj_views, &proj_est)?;

    let camera = if simultaneous {
        let cam_est = estimate_intrinsics(&cam_views, &IntrinsicsFitOptions::default())?;
        Some(device_report(&cam_views, &cam_est)?)
    } else {
        None
    };

    Ok(ProjectorCalibrationReport { projector, camera })
}

/// Extrinsic projector-camera calibration from a single known board pose.
///
/// Both intrinsics are inputs; the session surfaces
/// [`CalibrationError::PrereqMissing`] when either is absent. The result is
/// rejected when either device reprojects worse than
/// `params.max_reproj_error`.
pub fn calibrate_extrinsics(
    params: &ScanParams,
    view: &ProjectorView,
    camera: &DeviceIntrinsics,
    projector: &DeviceIntrinsics,
) -> Result<ExtrinsicCalibrationReport, CalibrationError> {
    let board = params.board_grid();
    if view.camera_corners.len() != board.len() {
        return Err(CalibrationError::CornerDetectionInsufficient {
            view: 0,
            needed: board.len(),
            got: view.camera_corners.len(),
        });
    }

    let mut kept_board = Vec::new();
    let mut kept_proj = Vec::new();
    for (b, c) in board.iter().zip(&view.camera_corners) {
        if let Some(pp) = view.decode.interpolate_projector_pixel(c.x, c.y) {
            kept_board.push(*b);
            kept_proj.push(pp);
        }
    }
    if kept_proj.len() < MIN_PROJECTOR_CORNERS {
        return Err(CalibrationError::CornerDetectionInsufficient {
            view: 0,
            needed: MIN_PROJECTOR_CORNERS,
            got: kept_proj.len(),
        });
    }

    let cam_model = camera.camera();
    let proj_model = projector.camera();

    let cam_pose = board_pose(&cam_model, &board, &view.camera_corners)?;
    let proj_pose = board_pose(&proj_model, &kept_board, &kept_proj)?;

    let cam_error = mean_reprojection_error(&cam_model, &cam_pose, &board, &view.camera_corners)?;
    if cam_error > params.max_reproj_error {
        return Err(CalibrationError::ReprojectionTooLarge {
            device: "camera",
            error: cam_error,
            bound: params.max_reproj_error,
        });
    }
    let proj_error = mean_reprojection_error(&proj_model, &proj_pose, &kept_board, &kept_proj)?;
    if proj_error > params.max_reproj_error {
        return Err(CalibrationError::ReprojectionTooLarge {
            device: "projector",
            error: proj_error,
            bound: params.max_reproj_error,
        });
    }

    let extrinsics = procam_core::ProCamExtrinsics::from_board_poses(&cam_pose, &proj_pose)?;

    let fundamental = fundamental_from_map(
        &view.decode,
        &RansacOptions {
            thresh: params.max_sampson_distance,
            min_inliers: 8,
            ..RansacOptions::default()
        },
        4,
    )
    .map(|e| e.model);

    Ok(ExtrinsicCalibrationReport {
        extrinsics,
        cam_pose: BoardPose::from_isometry(&cam_pose),
        proj_pose: BoardPose::from_isometry(&proj_pose),
        cam_error,
        proj_error,
        fundamental,
    })
}

/// Robust eight-point fit over a stride-subsampled decoded map.
///
/// Decoded maps carry outliers near depth discontinuities, so the fit runs
/// inside RANSAC. Returns `None` when no consensus exists.
pub fn fundamental_from_map(
    map: &CorrespondenceMap,
    opts: &RansacOptions,
    stride: u32,
) -> Option<RansacEstimate<Mat3>> {
    let stride = stride.max(1);
    let mut pairs = Vec::new();
    for y in (0..map.height()).step_by(stride as usize) {
        for x in (0..map.width()).step_by(stride as usize) {
            if let (Some(c), Some(r)) = (map.column(x, y), map.row(x, y)) {
                pairs.push(PixelPair {
                    cam: Pt2::new(x as Real, y as Real),
                    proj: Pt2::new(c as Real, r as Real),
                });
            }
        }
    }
    fundamental_ransac(&pairs, opts)
}
