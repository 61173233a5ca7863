//! The scanning session.
//!
//! A [`ScanSession`] owns every piece of mutable scanner state: the
//! calibration record, the background model, the cached geometry tables, the
//! frame source and the projector display. Commands run to completion one at
//! a time; algorithms receive borrows and never own state. Calibration
//! commits are atomic: a failed operation leaves the record untouched.

use std::path::PathBuf;

use log::{info, warn};
use procam_core::{Gray8, ProCamCalibration, Rgb8, ScanParams};
use serde::Serialize;
use thiserror::Error;

use crate::background::BackgroundModel;
use crate::board::{detect_checkerboard, BoardDetectError, BoardDetectOptions};
use crate::calibrate::{
    calibrate_camera, calibrate_extrinsics, calibrate_projector, CalibrationError,
    DeviceCalibrationReport, ExtrinsicCalibrationReport, ProjectorCalibrationReport,
    ProjectorView,
};
use crate::capture::{
    query_frame_with_retries, CaptureError, FrameSource, PatternDisplay, IDLE_COLOR, SPLASH_COLOR,
};
use crate::geometry::{evaluate_procam_geometry, GeometryError, GeometryTables};
use crate::gray::{decode_with_sequence, DecodeError, PatternFrame, PatternSequence};
use crate::persist;
use crate::triangulate::{apply_epipolar_filter, triangulate, ScanReconstruction};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Board(#[from] BoardDetectError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Session-level output settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root output directory; calibration lives under `calib/`, scans under
    /// `<object>/v<N>/`.
    pub outdir: PathBuf,
    /// Object name used for the scan output directories.
    pub object: String,
    /// Dump the raw captured frames next to each point cloud.
    pub save_frames: bool,
}

/// The menu commands of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Scan,
    ScanBackground,
    ResetBackground,
    CalibrateCamera,
    CalibrateProjector,
    CalibrateJoint,
    CalibrateExtrinsics,
    Exit,
}

impl Command {
    /// Map a pressed key onto a command. ESC and `q` both exit.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            's' => Some(Command::Scan),
            'b' => Some(Command::ScanBackground),
            'r' => Some(Command::ResetBackground),
            'c' => Some(Command::CalibrateCamera),
            'p' => Some(Command::CalibrateProjector),
            'a' => Some(Command::CalibrateJoint),
            'e' => Some(Command::CalibrateExtrinsics),
            'q' | '\u{1b}' => Some(Command::Exit),
            _ => None,
        }
    }

    /// The interactive menu text.
    pub fn menu() -> &'static str {
        "Press the following keys for the corresponding functions.\n\
         'S': Run scanner\n\
         'B': Estimate background\n\
         'R': Reset background\n\
         'C': Calibrate camera\n\
         'P': Calibrate projector\n\
         'A': Calibrate camera and projector simultaneously\n\
         'E': Calibrate projector-camera alignment\n\
         'Q'/ESC: Exit application"
    }
}

/// Machine-readable outcome of one command, printed by the CLI.
#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandReport {
    Scan {
        index: usize,
        points: usize,
        cloud: PathBuf,
    },
    Background {
        valid_pixels: usize,
    },
    ResetBackground,
    CameraCalibration(DeviceCalibrationReport),
    ProjectorCalibration(ProjectorCalibrationReport),
    ExtrinsicCalibration(ExtrinsicCalibrationReport),
    Exit,
}

/// Owner of all mutable scanner state.
pub struct ScanSession {
    params: ScanParams,
    config: SessionConfig,
    source: Box<dyn FrameSource>,
    display: Box<dyn PatternDisplay>,
    sequence: PatternSequence,
    board_opts: BoardDetectOptions,
    calib: ProCamCalibration,
    background: BackgroundModel,
    /// Ray/plane tables; dropped on every calibration commit and lazily
    /// rebuilt from the record.
    geometry: Option<GeometryTables>,
    scan_index: usize,
}

impl ScanSession {
    pub fn new(
        params: ScanParams,
        source: Box<dyn FrameSource>,
        display: Box<dyn PatternDisplay>,
        config: SessionConfig,
    ) -> Self {
        let sequence = PatternSequence::new(params.proj_width, params.proj_height, params.axes);
        let background = BackgroundModel::new(params.cam_width, params.cam_height);
        Self {
            params,
            config,
            source,
            display,
            sequence,
            board_opts: BoardDetectOptions::default(),
            calib: ProCamCalibration::default(),
            background,
            geometry: None,
            scan_index: 0,
        }
    }

    /// Bring up the acquisition backend and probe persisted calibration.
    ///
    /// Errors here are fatal: a session that cannot capture is useless.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.display.show_solid(SPLASH_COLOR)?;
        self.source.init(&self.params)?;
        self.source.start_capture()?;
        self.calib = persist::load_calibration(&self.config.outdir);
        self.display.show_solid(IDLE_COLOR)?;
        Ok(())
    }

    /// Stop capturing and blank the projector.
    pub fn shutdown(&mut self) {
        let _ = self.display.show_solid(IDLE_COLOR);
        if let Err(err) = self.source.end_capture() {
            warn!("ending capture: {err}");
        }
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    pub fn calibration(&self) -> &ProCamCalibration {
        &self.calib
    }

    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    pub fn scan_index(&self) -> usize {
        self.scan_index
    }

    pub fn is_calibrated(&self) -> bool {
        self.calib.has_camera_intrinsics()
            && self.calib.has_projector_intrinsics()
            && self.calib.has_extrinsics()
    }

    /// Run one command to completion.
    pub fn dispatch(&mut self, command: Command) -> Result<CommandReport, SessionError> {
        let report = match command {
            Command::Scan => self.run_scan(),
            Command::ScanBackground => self.run_background_capture(),
            Command::ResetBackground => self.reset_background(),
            Command::CalibrateCamera => self.run_camera_calibration(),
            Command::CalibrateProjector => self.run_projector_calibration(false),
            Command::CalibrateJoint => self.run_projector_calibration(true),
            Command::CalibrateExtrinsics => self.run_extrinsic_calibration(),
            Command::Exit => Ok(CommandReport::Exit),
        };
        let _ = self.display.show_solid(IDLE_COLOR);
        report
    }

    fn ensure_tables(&mut self) -> Result<(), SessionError> {
        if self.geometry.is_none() {
            self.geometry = Some(evaluate_procam_geometry(&self.params, &self.calib)?);
        }
        Ok(())
    }

    /// Grab one frame and verify it matches the configured camera geometry.
    fn grab_frame(&mut self) -> Result<Rgb8, SessionError> {
        let frame = query_frame_with_retries(self.source.as_mut(), self.params.frame_retries)?;
        if frame.width() != self.params.cam_width || frame.height() != self.params.cam_height {
            return Err(CaptureError::FrameSizeMismatch {
                got_w: frame.width(),
                got_h: frame.height(),
                want_w: self.params.cam_width,
                want_h: self.params.cam_height,
            }
            .into());
        }
        Ok(frame)
    }

    /// Project the full pattern sequence and capture one frame per pattern.
    ///
    /// Returns the luma captures in projection order plus the colour capture
    /// of the all-white frame, which textures the point cloud.
    fn capture_sequence(&mut self) -> Result<(Vec<Gray8>, Rgb8), SessionError> {
        let specs: Vec<PatternFrame> = self.sequence.frames().to_vec();
        let mut frames = Vec::with_capacity(specs.len());
        let mut light = Rgb8::new(self.params.cam_width, self.params.cam_height, [0, 0, 0]);

        for spec in specs {
            let rendered = self.sequence.render(&spec);
            self.display.show_pattern(&rendered)?;
            let capture = self.grab_frame()?;
            if spec == PatternFrame::White {
                light = capture.clone();
            }
            frames.push(capture.to_luma());
        }
        Ok((frames, light))
    }

    fn triangulate_capture(
        &mut self,
        use_background: bool,
    ) -> Result<(ScanReconstruction, Vec<Gray8>, Rgb8), SessionError> {
        self.ensure_tables()?;
        let (frames, light) = self.capture_sequence()?;
        let mut map = decode_with_sequence(&frames, &self.sequence, &self.params)?;

        if let Some(f) = self.calib.fundamental().copied() {
            let dropped = apply_epipolar_filter(&mut map, &f, self.params.max_sampson_distance);
            if dropped > 0 {
                info!("epipolar filter invalidated {dropped} pixels");
            }
        }

        let Some(tables) = self.geometry.as_ref() else {
            return Err(GeometryError::CalibrationMissing.into());
        };
        let background = use_background.then_some(&self.background);
        let recon = triangulate(&map, tables, &light, background, &(&self.params).into());
        Ok((recon, frames, light))
    }

    /// Command `S`: scan the object and persist the point cloud.
    pub fn run_scan(&mut self) -> Result<CommandReport, SessionError> {
        self.scan_index += 1;
        info!("running scanner (view {})", self.scan_index);

        let (recon, frames, _light) = self.triangulate_capture(true)?;

        let dir = persist::scan_dir(&self.config.outdir, &self.config.object, self.scan_index);
        let cloud = dir.join("cloud.ply");
        if let Err(err) = persist::write_ply(&cloud, &recon.cloud) {
            warn!("saving point cloud: {err}");
        }
        if self.config.save_frames {
            if let Err(err) = persist::write_frames(&dir, &frames) {
                warn!("saving captured frames: {err}");
            }
        }

        let points = recon.cloud.point_count();
        info!("scan {} produced {points} points", self.scan_index);
        Ok(CommandReport::Scan {
            index: self.scan_index,
            points,
            cloud,
        })
    }

    /// Command `B`: scan the empty scene into the background model.
    pub fn run_background_capture(&mut self) -> Result<CommandReport, SessionError> {
        self.background.reset();
        let (recon, _frames, light) = self.triangulate_capture(false)?;
        self.background.set_from_scan(&recon, &light);

        let valid_pixels = recon.cloud.point_count();
        info!("background model covers {valid_pixels} pixels");
        Ok(CommandReport::Background { valid_pixels })
    }

    /// Command `R`: forget the background model.
    pub fn reset_background(&mut self) -> Result<CommandReport, SessionError> {
        self.background.reset();
        Ok(CommandReport::ResetBackground)
    }

    fn persist_calibration(&self) {
        if let Err(err) = persist::save_calibration(&self.config.outdir, &self.calib) {
            warn!("persisting calibration: {err}");
        }
    }

    /// Command `C`: intrinsic camera calibration over `board_views` poses.
    pub fn run_camera_calibration(&mut self) -> Result<CommandReport, SessionError> {
        let mut views = Vec::with_capacity(self.params.board_views);
        for view in 0..self.params.board_views {
            self.display.show_solid(IDLE_COLOR)?;
            let frame = self.grab_frame()?;
            match detect_checkerboard(
                &frame.to_luma(),
                self.params.board_cols,
                self.params.board_rows,
                &self.board_opts,
            ) {
                Ok(corners) => views.push(corners),
                Err(err) => warn!("view {view}: {err}; skipping"),
            }
        }

        let report = calibrate_camera(&self.params, &views)?;
        info!(
            "camera calibrated over {} views, mean reprojection error {:.3} px",
            views.len(),
            report.mean_error
        );

        self.calib.set_camera(report.device);
        self.geometry = None;
        self.persist_calibration();
        Ok(CommandReport::CameraCalibration(report))
    }

    /// One projector-calibration pose: corners from the white-flood capture,
    /// correspondences from a full pattern sequence on the same board.
    fn capture_projector_view(&mut self) -> Result<ProjectorView, SessionError> {
        let (frames, light) = self.capture_sequence()?;
        let corners = detect_checkerboard(
            &light.to_luma(),
            self.params.board_cols,
            self.params.board_rows,
            &self.board_opts,
        )?;
        let decode = decode_with_sequence(&frames, &self.sequence, &self.params)?;
        Ok(ProjectorView {
            camera_corners: corners,
            decode,
        })
    }

    /// Commands `P` and `A`: intrinsic projector calibration through decoded
    /// correspondences, optionally re-estimating the camera from the same
    /// poses.
    pub fn run_projector_calibration(
        &mut self,
        simultaneous: bool,
    ) -> Result<CommandReport, SessionError> {
        let mut views = Vec::with_capacity(self.params.board_views);
        for view in 0..self.params.board_views {
            match self.capture_projector_view() {
                Ok(v) => views.push(v),
                Err(SessionError::Capture(err)) => return Err(err.into()),
                Err(err) => warn!("view {view}: {err}; skipping"),
            }
        }

        let report = calibrate_projector(&self.params, &views, simultaneous)?;
        info!(
            "projector calibrated, mean reprojection error {:.3} px",
            report.projector.mean_error
        );

        self.calib.set_projector(report.projector.device);
        if let Some(camera) = &report.camera {
            self.calib.set_camera(camera.device);
        }
        self.geometry = None;
        self.persist_calibration();
        Ok(CommandReport::ProjectorCalibration(report))
    }

    /// Command `E`: extrinsic projector-camera calibration from one pose.
    pub fn run_extrinsic_calibration(&mut self) -> Result<CommandReport, SessionError> {
        let (camera, projector) = match (self.calib.camera(), self.calib.projector()) {
            (Some(c), Some(p)) => (*c, *p),
            _ => return Err(CalibrationError::PrereqMissing.into()),
        };

        let view = self.capture_projector_view()?;
        let report = calibrate_extrinsics(&self.params, &view, &camera, &projector)?;
        info!(
            "extrinsics calibrated, reprojection errors {:.3} px (camera) / {:.3} px (projector)",
            report.cam_error, report.proj_error
        );

        self.calib
            .set_extrinsics(report.extrinsics, report.cam_pose, report.proj_pose)
            .map_err(CalibrationError::from)?;
        if let Some(f) = report.fundamental {
            self.calib.set_fundamental(f);
        }
        self.geometry = None;
        self.ensure_tables()?;
        self.persist_calibration();
        Ok(CommandReport::ExtrinsicCalibration(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use nalgebra::{Rotation3, Translation3, UnitQuaternion};
    use procam_core::{
        synthetic::{plane_surface, render_board_image, ProcamScene},
        BoardPose, BrownConrady5, DeviceIntrinsics, Intrinsics, Iso3, PinholeCamera,
        ProCamExtrinsics, Real, Vec3,
    };

    use crate::capture::NullDisplay;

    fn scene() -> ProcamScene {
        let camera = PinholeCamera::new(
            Intrinsics {
                fx: 140.0,
                fy: 140.0,
                cx: 80.0,
                cy: 60.0,
                skew: 0.0,
            },
            BrownConrady5::none(),
        );
        let projector = PinholeCamera::new(
            Intrinsics {
                fx: 180.0,
                fy: 180.0,
                cx: 64.0,
                cy: 48.0,
                skew: 0.0,
            },
            BrownConrady5::none(),
        );
        let rot = Rotation3::from_euler_angles(0.0, -0.35, 0.0);
        let extrinsics =
            ProCamExtrinsics::new(rot.into_inner(), Vec3::new(180.0, 0.0, 90.0)).unwrap();
        ProcamScene {
            camera,
            projector,
            extrinsics,
        }
    }

    fn scan_params() -> ScanParams {
        ScanParams {
            cam_width: 160,
            cam_height: 120,
            proj_width: 128,
            proj_height: 96,
            max_ray_plane_gap: 6.0,
            background_threshold: 5.0,
            ..ScanParams::default()
        }
    }

    /// Ground-truth calibration files matching `scene()`, as a previous
    /// session would have left them.
    fn persist_scene_calibration(outdir: &std::path::Path, scene: &ProcamScene) {
        let mut calib = ProCamCalibration::default();
        calib.set_camera(DeviceIntrinsics {
            intrinsics: scene.camera.intrinsics,
            distortion: scene.camera.distortion,
        });
        calib.set_projector(DeviceIntrinsics {
            intrinsics: scene.projector.intrinsics,
            distortion: scene.projector.distortion,
        });

        // Extrinsics persist through board poses; an identity camera pose
        // makes the projector pose equal the relative transform.
        let cam_pose = BoardPose::from_isometry(&Iso3::identity());
        let proj_pose = BoardPose::from_isometry(&Iso3::from_parts(
            Translation3::from(*scene.extrinsics.translation()),
            UnitQuaternion::from_matrix(scene.extrinsics.rotation()),
        ));
        calib
            .set_extrinsics(scene.extrinsics, cam_pose, proj_pose)
            .unwrap();

        persist::save_calibration(outdir, &calib).unwrap();
    }

    /// Simulated projector-camera rig: the display side stores the projected
    /// pattern, the source side renders the camera view of it on an analytic
    /// surface.
    struct Rig {
        scene: ProcamScene,
        params: ScanParams,
        surface_z: Real,
        shown: Gray8,
    }

    impl Rig {
        fn shared(scene: ProcamScene, params: ScanParams, surface_z: Real) -> Rc<RefCell<Rig>> {
            let shown = Gray8::new(params.proj_width, params.proj_height, 255);
            Rc::new(RefCell::new(Rig {
                scene,
                params,
                surface_z,
                shown,
            }))
        }
    }

    struct RigDisplay(Rc<RefCell<Rig>>);

    impl PatternDisplay for RigDisplay {
        fn show_pattern(&mut self, pattern: &Gray8) -> Result<(), CaptureError> {
            self.0.borrow_mut().shown = pattern.clone();
            Ok(())
        }

        fn show_solid(&mut self, color: [u8; 3]) -> Result<(), CaptureError> {
            let mut rig = self.0.borrow_mut();
            let level = ((color[0] as u16 + color[1] as u16 + color[2] as u16) / 3) as u8;
            rig.shown = Gray8::new(rig.params.proj_width, rig.params.proj_height, level);
            Ok(())
        }
    }

    struct RigSource(Rc<RefCell<Rig>>);

    impl FrameSource for RigSource {
        fn init(&mut self, _params: &ScanParams) -> Result<(), CaptureError> {
            Ok(())
        }

        fn start_capture(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn query_frame(&mut self) -> Result<Rgb8, CaptureError> {
            let rig = self.0.borrow();
            let surface = plane_surface(rig.surface_z);
            let gray = rig
                .scene
                .render_projection(&rig.params, &surface, &rig.shown, 20);
            let data = gray.as_slice().iter().map(|&v| [v, v, v]).collect();
            Ok(Rgb8::from_vec(gray.width(), gray.height(), data).expect("sized buffer"))
        }

        fn end_capture(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    fn rig_session(
        rig: &Rc<RefCell<Rig>>,
        params: &ScanParams,
        outdir: &std::path::Path,
    ) -> ScanSession {
        let mut session = ScanSession::new(
            params.clone(),
            Box::new(RigSource(rig.clone())),
            Box::new(RigDisplay(rig.clone())),
            SessionConfig {
                outdir: outdir.to_path_buf(),
                object: "object".into(),
                save_frames: false,
            },
        );
        session.start().unwrap();
        session
    }

    #[test]
    fn scan_reconstructs_and_persists_a_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene();
        let params = scan_params();
        persist_scene_calibration(dir.path(), &scene);

        let rig = Rig::shared(scene, params.clone(), 500.0);
        let mut session = rig_session(&rig, &params, dir.path());
        assert!(session.is_calibrated());

        let report = session.dispatch(Command::Scan).unwrap();
        let CommandReport::Scan {
            index,
            points,
            cloud,
        } = report
        else {
            panic!("unexpected report");
        };
        assert_eq!(index, 1);
        assert!(points > 1000, "only {points} points");
        assert!(cloud.ends_with("object/v1/cloud.ply"));
        assert!(cloud.exists());
        assert_eq!(session.scan_index(), 1);
    }

    #[test]
    fn background_capture_subtracts_a_repeat_scan() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene();
        let params = scan_params();
        persist_scene_calibration(dir.path(), &scene);

        let rig = Rig::shared(scene, params.clone(), 700.0);
        let mut session = rig_session(&rig, &params, dir.path());

        let report = session.dispatch(Command::ScanBackground).unwrap();
        let CommandReport::Background { valid_pixels } = report else {
            panic!("unexpected report");
        };
        assert!(valid_pixels > 1000);
        assert!(session.background().is_populated());

        // The unchanged scene is all background.
        let CommandReport::Scan { points, .. } = session.dispatch(Command::Scan).unwrap() else {
            panic!("unexpected report");
        };
        assert_eq!(points, 0);

        // An object in front of the background survives subtraction.
        rig.borrow_mut().surface_z = 500.0;
        let CommandReport::Scan { points, .. } = session.dispatch(Command::Scan).unwrap() else {
            panic!("unexpected report");
        };
        assert!(points > 1000, "only {points} points");

        // Resetting the background restores the full scene.
        rig.borrow_mut().surface_z = 700.0;
        session.dispatch(Command::ResetBackground).unwrap();
        assert!(!session.background().is_populated());
        let CommandReport::Scan { points, .. } = session.dispatch(Command::Scan).unwrap() else {
            panic!("unexpected report");
        };
        assert!(points > 1000);
    }

    #[test]
    fn scan_without_calibration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let params = scan_params();
        let rig = Rig::shared(scene(), params.clone(), 500.0);
        let mut session = rig_session(&rig, &params, dir.path());

        assert!(!session.is_calibrated());
        assert!(matches!(
            session.dispatch(Command::Scan),
            Err(SessionError::Geometry(GeometryError::CalibrationMissing))
        ));
    }

    #[test]
    fn extrinsics_require_both_intrinsics() {
        let dir = tempfile::tempdir().unwrap();
        let params = scan_params();
        let rig = Rig::shared(scene(), params.clone(), 500.0);
        let mut session = rig_session(&rig, &params, dir.path());

        assert!(matches!(
            session.dispatch(Command::CalibrateExtrinsics),
            Err(SessionError::Calibration(CalibrationError::PrereqMissing))
        ));
    }

    #[test]
    fn featureless_scene_fails_projector_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let params = scan_params();
        let rig = Rig::shared(scene(), params.clone(), 500.0);
        let mut session = rig_session(&rig, &params, dir.path());

        // Every view's flood capture is featureless, so no corners are found
        // and no usable pose survives.
        assert!(matches!(
            session.dispatch(Command::CalibrateProjector),
            Err(SessionError::Calibration(
                CalibrationError::NotEnoughViews { .. }
            ))
        ));
    }

    /// Source replaying a fixed set of frames, for calibration flows where
    /// the display content does not matter.
    struct QueueSource(VecDeque<Rgb8>);

    impl FrameSource for QueueSource {
        fn init(&mut self, _params: &ScanParams) -> Result<(), CaptureError> {
            Ok(())
        }

        fn start_capture(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn query_frame(&mut self) -> Result<Rgb8, CaptureError> {
            self.0.pop_front().ok_or(CaptureError::FrameUnavailable)
        }

        fn end_capture(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    #[test]
    fn camera_calibration_runs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let camera = PinholeCamera::new(
            Intrinsics {
                fx: 300.0,
                fy: 300.0,
                cx: 160.0,
                cy: 120.0,
                skew: 0.0,
            },
            BrownConrady5::none(),
        );
        let params = ScanParams {
            cam_width: 320,
            cam_height: 240,
            board_views: 6,
            ..scan_params()
        };

        let poses = [
            ((0.00, 0.00, 0.00), (-105.0, -75.0, 450.0)),
            ((0.15, -0.12, 0.05), (-100.0, -70.0, 480.0)),
            ((-0.12, 0.10, -0.04), (-110.0, -78.0, 460.0)),
            ((0.10, 0.14, 0.00), (-102.0, -72.0, 500.0)),
            ((-0.08, -0.14, 0.06), (-108.0, -76.0, 470.0)),
            ((0.18, 0.00, -0.06), (-104.0, -74.0, 490.0)),
        ];
        let frames: VecDeque<Rgb8> = poses
            .iter()
            .map(|&((rx, ry, rz), (tx, ty, tz))| {
                let pose = Iso3::from_parts(
                    Translation3::new(tx, ty, tz),
                    Rotation3::from_euler_angles(rx, ry, rz).into(),
                );
                let gray = render_board_image(
                    &camera,
                    &pose,
                    params.board_cols,
                    params.board_rows,
                    params.square_size,
                    params.cam_width,
                    params.cam_height,
                );
                let data = gray.as_slice().iter().map(|&v| [v, v, v]).collect();
                Rgb8::from_vec(gray.width(), gray.height(), data).unwrap()
            })
            .collect();

        let mut session = ScanSession::new(
            params.clone(),
            Box::new(QueueSource(frames)),
            Box::new(NullDisplay),
            SessionConfig {
                outdir: dir.path().to_path_buf(),
                object: "object".into(),
                save_frames: false,
            },
        );
        session.start().unwrap();

        let report = session.dispatch(Command::CalibrateCamera).unwrap();
        let CommandReport::CameraCalibration(report) = report else {
            panic!("unexpected report");
        };

        assert!(session.calibration().has_camera_intrinsics());
        let fx = report.device.intrinsics.fx;
        assert!((fx - 300.0).abs() / 300.0 < 0.05, "fx {fx}");

        // The commit is persisted for the next session.
        let files = persist::CalibrationFiles::under(dir.path());
        assert!(files.cam_intrinsic.exists());
        assert!(files.cam_distortion.exists());
        assert!(!files.proj_intrinsic.exists());
    }

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(Command::from_key('s'), Some(Command::Scan));
        assert_eq!(Command::from_key('S'), Some(Command::Scan));
        assert_eq!(Command::from_key('b'), Some(Command::ScanBackground));
        assert_eq!(Command::from_key('r'), Some(Command::ResetBackground));
        assert_eq!(Command::from_key('c'), Some(Command::CalibrateCamera));
        assert_eq!(Command::from_key('p'), Some(Command::CalibrateProjector));
        assert_eq!(Command::from_key('a'), Some(Command::CalibrateJoint));
        assert_eq!(Command::from_key('e'), Some(Command::CalibrateExtrinsics));
        assert_eq!(Command::from_key('q'), Some(Command::Exit));
        assert_eq!(Command::from_key('\u{1b}'), Some(Command::Exit));
        assert_eq!(Command::from_key('x'), None);
    }
}
