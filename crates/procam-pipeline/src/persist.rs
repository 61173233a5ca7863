//! Calibration and point-cloud persistence.
//!
//! Every calibration matrix lives in its own XML file under
//! `<outdir>/calib/{cam,proj}/`. On startup each expected file is probed and
//! successful loads set the corresponding validity flags; extrinsics are only
//! accepted once both intrinsics loaded. Point clouds are written as ASCII
//! PLY with per-vertex colour into the per-scan output directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use procam_core::{
    BoardPose, BrownConrady5, DeviceIntrinsics, Gray8, Intrinsics, Mat3, PointCloud,
    ProCamCalibration, ProCamExtrinsics, Real, Vec3,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not a matrix file: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("{path} holds a {got_rows}x{got_cols} matrix, expected {rows}x{cols}")]
    Shape {
        path: PathBuf,
        rows: usize,
        cols: usize,
        got_rows: usize,
        got_cols: usize,
    },
    #[error("encoding frame {path}: {source}")]
    Frame {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// On-disk layout of one matrix: row-major whitespace-separated doubles.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "matrix")]
struct MatrixXml {
    rows: usize,
    cols: usize,
    data: String,
}

/// Write one matrix to its own XML file, creating parent directories.
pub fn write_matrix(
    path: &Path,
    rows: usize,
    cols: usize,
    values: &[Real],
) -> Result<(), PersistError> {
    debug_assert_eq!(values.len(), rows * cols);
    let record = MatrixXml {
        rows,
        cols,
        data: values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" "),
    };
    let body = quick_xml::se::to_string(&record).map_err(|e| PersistError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, body).map_err(|source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a matrix of a known shape back from its XML file.
pub fn read_matrix(path: &Path, rows: usize, cols: usize) -> Result<Vec<Real>, PersistError> {
    let text = fs::read_to_string(path).map_err(|source| PersistError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let record: MatrixXml =
        quick_xml::de::from_str(&text).map_err(|e| PersistError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if record.rows != rows || record.cols != cols {
        return Err(PersistError::Shape {
            path: path.to_path_buf(),
            rows,
            cols,
            got_rows: record.rows,
            got_cols: record.cols,
        });
    }

    let values = record
        .data
        .split_whitespace()
        .map(str::parse::<Real>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PersistError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if values.len() != rows * cols {
        return Err(PersistError::Malformed {
            path: path.to_path_buf(),
            reason: format!("{} values for a {rows}x{cols} matrix", values.len()),
        });
    }
    Ok(values)
}

/// Paths of the seven calibration files under one output directory.
#[derive(Debug, Clone)]
pub struct CalibrationFiles {
    pub cam_intrinsic: PathBuf,
    pub cam_distortion: PathBuf,
    pub proj_intrinsic: PathBuf,
    pub proj_distortion: PathBuf,
    pub cam_extrinsic: PathBuf,
    pub proj_extrinsic: PathBuf,
    pub fundamental_matrix: PathBuf,
}

impl CalibrationFiles {
    pub fn under(outdir: &Path) -> Self {
        let cam = outdir.join("calib").join("cam");
        let proj = outdir.join("calib").join("proj");
        Self {
            cam_intrinsic: cam.join("cam_intrinsic.xml"),
            cam_distortion: cam.join("cam_distortion.xml"),
            proj_intrinsic: proj.join("proj_intrinsic.xml"),
            proj_distortion: proj.join("proj_distortion.xml"),
            cam_extrinsic: proj.join("cam_extrinsic.xml"),
            proj_extrinsic: proj.join("proj_extrinsic.xml"),
            fundamental_matrix: proj.join("fundamental_matrix.xml"),
        }
    }
}

fn write_device(
    intrinsic_path: &Path,
    distortion_path: &Path,
    device: &DeviceIntrinsics,
) -> Result<(), PersistError> {
    let k = device.intrinsics.k_matrix();
    write_matrix(intrinsic_path, 3, 3, k.transpose().as_slice())?;
    write_matrix(distortion_path, 5, 1, &device.distortion.as_vector())
}

fn read_device(
    intrinsic_path: &Path,
    distortion_path: &Path,
) -> Result<DeviceIntrinsics, PersistError> {
    let k = read_matrix(intrinsic_path, 3, 3)?;
    let d = read_matrix(distortion_path, 5, 1)?;
    Ok(DeviceIntrinsics {
        intrinsics: Intrinsics::from_k_matrix(&Mat3::from_row_slice(&k)),
        distortion: BrownConrady5::from_vector(&[d[0], d[1], d[2], d[3], d[4]]),
    })
}

/// Device extrinsics persist as 2x3: row 0 the Rodrigues rotation vector,
/// row 1 the translation.
fn write_board_pose(path: &Path, pose: &BoardPose) -> Result<(), PersistError> {
    let values = [
        pose.rodrigues.x,
        pose.rodrigues.y,
        pose.rodrigues.z,
        pose.translation.x,
        pose.translation.y,
        pose.translation.z,
    ];
    write_matrix(path, 2, 3, &values)
}

fn read_board_pose(path: &Path) -> Result<BoardPose, PersistError> {
    let v = read_matrix(path, 2, 3)?;
    Ok(BoardPose {
        rodrigues: Vec3::new(v[0], v[1], v[2]),
        translation: Vec3::new(v[3], v[4], v[5]),
    })
}

/// Write every populated part of a calibration record.
pub fn save_calibration(outdir: &Path, calib: &ProCamCalibration) -> Result<(), PersistError> {
    let files = CalibrationFiles::under(outdir);
    if let Some(cam) = calib.camera() {
        write_device(&files.cam_intrinsic, &files.cam_distortion, cam)?;
    }
    if let Some(proj) = calib.projector() {
        write_device(&files.proj_intrinsic, &files.proj_distortion, proj)?;
    }
    if let (Some(cam_pose), Some(proj_pose)) = (calib.cam_board_pose(), calib.proj_board_pose()) {
        write_board_pose(&files.cam_extrinsic, cam_pose)?;
        write_board_pose(&files.proj_extrinsic, proj_pose)?;
    }
    if let Some(f) = calib.fundamental() {
        write_matrix(&files.fundamental_matrix, 3, 3, f.transpose().as_slice())?;
    }
    Ok(())
}

/// Probe the calibration files of an output directory.
///
/// Missing files are normal on a first run; malformed files are warned about.
/// Either way the corresponding sub-calibration stays unset, and extrinsics
/// load only once both intrinsics have.
pub fn load_calibration(outdir: &Path) -> ProCamCalibration {
    let files = CalibrationFiles::under(outdir);
    let mut calib = ProCamCalibration::default();

    match read_device(&files.cam_intrinsic, &files.cam_distortion) {
        Ok(device) => {
            calib.set_camera(device);
            info!("loaded previous intrinsic camera calibration");
        }
        Err(err) => {
            report_probe("camera intrinsics", &err);
        }
    }
    match read_device(&files.proj_intrinsic, &files.proj_distortion) {
        Ok(device) => {
            calib.set_projector(device);
            info!("loaded previous intrinsic projector calibration");
        }
        Err(err) => {
            report_probe("projector intrinsics", &err);
        }
    }

    let poses = read_board_pose(&files.cam_extrinsic)
        .and_then(|cam| read_board_pose(&files.proj_extrinsic).map(|proj| (cam, proj)));
    match poses {
        Ok((cam_pose, proj_pose)) => {
            let loaded = ProCamExtrinsics::from_board_poses(
                &cam_pose.to_isometry(),
                &proj_pose.to_isometry(),
            )
            .map_err(|e| e.to_string())
            .and_then(|ext| {
                calib
                    .set_extrinsics(ext, cam_pose, proj_pose)
                    .map_err(|e| e.to_string())
            });
            match loaded {
                Ok(()) => info!("loaded previous extrinsic projector-camera calibration"),
                Err(reason) => warn!("ignoring persisted extrinsics: {reason}"),
            }
        }
        Err(err) => {
            report_probe("projector-camera extrinsics", &err);
        }
    }

    match read_matrix(&files.fundamental_matrix, 3, 3) {
        Ok(f) => {
            calib.set_fundamental(Mat3::from_row_slice(&f));
            info!("loaded previous fundamental matrix");
        }
        Err(err) => {
            report_probe("fundamental matrix", &err);
        }
    }

    calib
}

fn report_probe(what: &str, err: &PersistError) {
    match err {
        PersistError::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            info!("no persisted {what}");
        }
        other => warn!("probing persisted {what}: {other}"),
    }
}

/// Output directory of one scan: `<outdir>/<object>/v<index>/`.
pub fn scan_dir(outdir: &Path, object: &str, index: usize) -> PathBuf {
    outdir.join(object).join(format!("v{index}"))
}

/// Write a point cloud as ASCII PLY with per-vertex colour.
pub fn write_ply(path: &Path, cloud: &PointCloud) -> Result<(), PersistError> {
    use std::fmt::Write as _;

    let mut body = String::new();
    let mut count = 0usize;
    for (_, _, p) in cloud.iter_points() {
        // Real's Display prints the shortest representation that parses back
        // to the same value.
        writeln!(
            body,
            "{} {} {} {} {} {}",
            p.position.x, p.position.y, p.position.z, p.color[0], p.color[1], p.color[2]
        )
        .expect("writing to a String cannot fail");
        count += 1;
    }

    let header = format!(
        "ply\nformat ascii 1.0\nelement vertex {count}\n\
         property double x\nproperty double y\nproperty double z\n\
         property uchar red\nproperty uchar green\nproperty uchar blue\n\
         end_header\n"
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, header + &body).map_err(|source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Dump captured frames next to the cloud as `frame_NN.png`.
pub fn write_frames(dir: &Path, frames: &[Gray8]) -> Result<(), PersistError> {
    fs::create_dir_all(dir).map_err(|source| PersistError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    for (i, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("frame_{i:02}.png"));
        let buffer =
            image::GrayImage::from_raw(frame.width(), frame.height(), frame.as_slice().to_vec())
                .ok_or_else(|| PersistError::Malformed {
                    path: path.clone(),
                    reason: "frame buffer size mismatch".into(),
                })?;
        buffer
            .save(&path)
            .map_err(|source| PersistError::Frame { path, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;
    use procam_core::{Pt3, ScanPoint};

    fn device(fx: Real) -> DeviceIntrinsics {
        DeviceIntrinsics {
            intrinsics: Intrinsics {
                fx,
                fy: fx * 0.99,
                cx: 512.5,
                cy: 384.25,
                skew: 0.0,
            },
            distortion: BrownConrady5::from_vector(&[-0.2, 0.05, 0.0, 1e-3, -2e-4]),
        }
    }

    fn full_calibration() -> ProCamCalibration {
        let mut calib = ProCamCalibration::default();
        calib.set_camera(device(900.0));
        calib.set_projector(device(1400.0));

        let cam_pose = BoardPose {
            rodrigues: Vec3::new(0.1, -0.05, 0.02),
            translation: Vec3::new(-100.0, -80.0, 600.0),
        };
        let proj_pose = BoardPose {
            rodrigues: Vec3::new(0.05, 0.1, -0.01),
            translation: Vec3::new(-180.0, -75.0, 640.0),
        };
        let ext = ProCamExtrinsics::from_board_poses(
            &cam_pose.to_isometry(),
            &proj_pose.to_isometry(),
        )
        .unwrap();
        calib.set_extrinsics(ext, cam_pose, proj_pose).unwrap();

        let rot = Rotation3::from_euler_angles(0.3, -0.1, 0.2).into_inner();
        calib.set_fundamental(rot);
        calib
    }

    #[test]
    fn matrix_roundtrip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.xml");
        let values = [1.0, -2.5, 3.25e-7, 4.0, 5.5, 1.0 / 3.0];

        write_matrix(&path, 2, 3, &values).unwrap();
        let back = read_matrix(&path, 2, 3).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.xml");
        write_matrix(&path, 3, 3, &[0.0; 9]).unwrap();
        assert!(matches!(
            read_matrix(&path, 2, 3),
            Err(PersistError::Shape { .. })
        ));
    }

    #[test]
    fn calibration_roundtrips_through_the_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let calib = full_calibration();

        save_calibration(dir.path(), &calib).unwrap();
        let loaded = load_calibration(dir.path());

        assert!(loaded.has_camera_intrinsics());
        assert!(loaded.has_projector_intrinsics());
        assert!(loaded.has_extrinsics());
        assert!(loaded.fundamental().is_some());

        let cam = loaded.camera().unwrap();
        assert_eq!(cam.intrinsics.fx, 900.0);
        assert_eq!(cam.distortion.k1, -0.2);

        let want = calib.extrinsics().unwrap();
        let got = loaded.extrinsics().unwrap();
        assert!((got.rotation() - want.rotation()).norm() < 1e-12);
        assert!((got.translation() - want.translation()).norm() < 1e-12);
    }

    #[test]
    fn extrinsics_without_intrinsics_stay_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let calib = full_calibration();
        save_calibration(dir.path(), &calib).unwrap();

        // Remove the projector intrinsics; the persisted extrinsics must then
        // be ignored on load.
        let files = CalibrationFiles::under(dir.path());
        fs::remove_file(&files.proj_intrinsic).unwrap();

        let loaded = load_calibration(dir.path());
        assert!(loaded.has_camera_intrinsics());
        assert!(!loaded.has_projector_intrinsics());
        assert!(!loaded.has_extrinsics());
    }

    #[test]
    fn empty_directory_loads_an_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_calibration(dir.path());
        assert!(!loaded.has_camera_intrinsics());
        assert!(!loaded.has_projector_intrinsics());
        assert!(!loaded.has_extrinsics());
        assert!(loaded.fundamental().is_none());
    }

    #[test]
    fn ply_lists_every_point_with_colour() {
        let dir = tempfile::tempdir().unwrap();
        let path = scan_dir(dir.path(), "object", 1).join("cloud.ply");

        let mut cloud = PointCloud::new(4, 2);
        cloud.set(
            1,
            0,
            ScanPoint {
                position: Pt3::new(1.5, -2.0, 500.0),
                color: [10, 20, 30],
                reliable: true,
            },
        );
        cloud.set(
            3,
            1,
            ScanPoint {
                position: Pt3::new(0.0, 0.25, 499.0),
                color: [200, 100, 0],
                reliable: false,
            },
        );

        write_ply(&path, &cloud).unwrap();
        let text = fs::read_to_string(&path).unwrap();

        assert!(text.starts_with("ply\nformat ascii 1.0\nelement vertex 2\n"));
        assert!(text.contains("property uchar red\n"));
        assert!(text.contains("1.5 -2 500 10 20 30\n"));
        assert!(text.contains("0 0.25 499 200 100 0\n"));
    }

    #[test]
    fn frame_dumps_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![Gray8::new(4, 4, 0), Gray8::new(4, 4, 255)];

        write_frames(dir.path(), &frames).unwrap();
        assert!(dir.path().join("frame_00.png").exists());
        assert!(dir.path().join("frame_01.png").exists());
    }
}
