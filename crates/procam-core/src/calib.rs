//! Projector-camera calibration state.
//!
//! The session owns one [`ProCamCalibration`]; algorithms receive read-only
//! borrows. Validity is encoded through `Option`: a sub-calibration either
//! exists fully populated or not at all, and commits happen through setters
//! that validate their input first, so the record is never half-updated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{Iso3, Mat3, Pt3, Real, Vec3};
use crate::models::{BrownConrady5, Intrinsics, PinholeCamera};

/// Tolerance on `det(R) - 1` for accepting a rotation matrix.
const ROTATION_DET_TOL: Real = 1e-6;

#[derive(Debug, Error)]
pub enum CalibStateError {
    /// Extrinsics were supplied before both device intrinsics.
    #[error("extrinsics require both camera and projector intrinsics")]
    IntrinsicsMissing,
    /// The supplied rotation is not a proper rotation.
    #[error("rotation determinant {0} is not +1")]
    ImproperRotation(Real),
}

/// Intrinsic calibration of one device (camera or projector).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeviceIntrinsics {
    pub intrinsics: Intrinsics,
    pub distortion: BrownConrady5,
}

impl DeviceIntrinsics {
    pub fn camera(&self) -> PinholeCamera {
        PinholeCamera::new(self.intrinsics, self.distortion)
    }
}

/// Rigid transform mapping camera-frame coordinates into the projector frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProCamExtrinsics {
    rotation: Mat3,
    translation: Vec3,
}

impl ProCamExtrinsics {
    /// Build from a rotation and translation, rejecting improper rotations.
    pub fn new(rotation: Mat3, translation: Vec3) -> Result<Self, CalibStateError> {
        let det = rotation.determinant();
        if (det - 1.0).abs() > ROTATION_DET_TOL {
            return Err(CalibStateError::ImproperRotation(det));
        }
        Ok(Self {
            rotation,
            translation,
        })
    }

    /// Build from the relative pose of two devices observing the same board:
    /// `cam_pose` and `proj_pose` both map board coordinates into the
    /// respective device frame.
    pub fn from_board_poses(cam_pose: &Iso3, proj_pose: &Iso3) -> Result<Self, CalibStateError> {
        let rel = proj_pose * cam_pose.inverse();
        Self::new(
            *rel.rotation.to_rotation_matrix().matrix(),
            rel.translation.vector,
        )
    }

    pub fn rotation(&self) -> &Mat3 {
        &self.rotation
    }

    pub fn translation(&self) -> &Vec3 {
        &self.translation
    }

    /// Map a camera-frame point into the projector frame.
    pub fn camera_to_projector(&self, p: &Pt3) -> Pt3 {
        Pt3::from(self.rotation * p.coords + self.translation)
    }

    /// Map a projector-frame direction into the camera frame.
    pub fn projector_dir_to_camera(&self, d: &Vec3) -> Vec3 {
        self.rotation.transpose() * d
    }

    /// Projector centre expressed in the camera frame: `-Rᵀ t`.
    pub fn projector_center(&self) -> Pt3 {
        Pt3::from(-(self.rotation.transpose() * self.translation))
    }
}

/// One device's pose relative to the calibration board, in the persisted
/// layout: a Rodrigues rotation 3-vector plus a translation 3-vector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BoardPose {
    pub rodrigues: Vec3,
    pub translation: Vec3,
}

impl BoardPose {
    pub fn from_isometry(iso: &Iso3) -> Self {
        Self {
            rodrigues: iso.rotation.scaled_axis(),
            translation: iso.translation.vector,
        }
    }

    pub fn to_isometry(&self) -> Iso3 {
        Iso3::from_parts(
            self.translation.into(),
            nalgebra::UnitQuaternion::from_scaled_axis(self.rodrigues),
        )
    }
}

/// The full calibration record owned by a scanning session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProCamCalibration {
    camera: Option<DeviceIntrinsics>,
    projector: Option<DeviceIntrinsics>,
    extrinsics: Option<ProCamExtrinsics>,
    fundamental: Option<Mat3>,
    /// Board pose of the camera from the last extrinsic calibration.
    cam_board_pose: Option<BoardPose>,
    /// Board pose of the projector from the last extrinsic calibration.
    proj_board_pose: Option<BoardPose>,
}

impl ProCamCalibration {
    pub fn camera(&self) -> Option<&DeviceIntrinsics> {
        self.camera.as_ref()
    }

    pub fn projector(&self) -> Option<&DeviceIntrinsics> {
        self.projector.as_ref()
    }

    pub fn extrinsics(&self) -> Option<&ProCamExtrinsics> {
        self.extrinsics.as_ref()
    }

    pub fn fundamental(&self) -> Option<&Mat3> {
        self.fundamental.as_ref()
    }

    pub fn cam_board_pose(&self) -> Option<&BoardPose> {
        self.cam_board_pose.as_ref()
    }

    pub fn proj_board_pose(&self) -> Option<&BoardPose> {
        self.proj_board_pose.as_ref()
    }

    pub fn has_camera_intrinsics(&self) -> bool {
        self.camera.is_some()
    }

    pub fn has_projector_intrinsics(&self) -> bool {
        self.projector.is_some()
    }

    pub fn has_extrinsics(&self) -> bool {
        self.extrinsics.is_some()
    }

    pub fn set_camera(&mut self, device: DeviceIntrinsics) {
        self.camera = Some(device);
    }

    pub fn set_projector(&mut self, device: DeviceIntrinsics) {
        self.projector = Some(device);
    }

    /// Commit an extrinsic calibration together with the board poses it was
    /// derived from. Fails (leaving the record untouched) unless both device
    /// intrinsics are already valid.
    pub fn set_extrinsics(
        &mut self,
        extrinsics: ProCamExtrinsics,
        cam_pose: BoardPose,
        proj_pose: BoardPose,
    ) -> Result<(), CalibStateError> {
        if self.camera.is_none() || self.projector.is_none() {
            return Err(CalibStateError::IntrinsicsMissing);
        }
        self.extrinsics = Some(extrinsics);
        self.cam_board_pose = Some(cam_pose);
        self.proj_board_pose = Some(proj_pose);
        Ok(())
    }

    pub fn set_fundamental(&mut self, f: Mat3) {
        self.fundamental = Some(f);
    }
}
