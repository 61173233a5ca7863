//! Frame acquisition and projector display abstractions.
//!
//! The algorithmic core never talks to a device; it consumes frames through
//! [`FrameSource`] and emits patterns through [`PatternDisplay`]. Backends are
//! selected by configuration. Only the directory-replay source is bundled;
//! the device backends surface an init failure when selected without support.

use std::fmt;
use std::path::{Path, PathBuf};

use log::warn;
use procam_core::{Gray8, Rgb8, ScanParams};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Splash colour shown while the session starts up.
pub const SPLASH_COLOR: [u8; 3] = [0, 0, 255];
/// Idle colour shown between commands; doubles as the flood illumination for
/// corner detection.
pub const IDLE_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera init failed: {0}")]
    InitFailed(String),
    #[error("backend {0} is not supported by this build")]
    Unsupported(Backend),
    #[error("the directory backend requires a frame directory")]
    ReplayDirMissing,
    #[error("no frame was available")]
    FrameUnavailable,
    #[error("frame is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    FrameSizeMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("decoding {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Acquisition backend, selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    OpenCv,
    CanonSdk,
    PointGrey,
    Kinect,
    #[default]
    Directory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::OpenCv => "opencv",
            Backend::CanonSdk => "canon_sdk",
            Backend::PointGrey => "point_grey",
            Backend::Kinect => "kinect",
            Backend::Directory => "directory",
        };
        f.write_str(name)
    }
}

/// One undistorted colour frame per projected pattern, in capture order.
///
/// The same geometric model is assumed across all frames of a session.
pub trait FrameSource {
    fn init(&mut self, params: &ScanParams) -> Result<(), CaptureError>;
    fn start_capture(&mut self) -> Result<(), CaptureError>;
    fn query_frame(&mut self) -> Result<Rgb8, CaptureError>;
    fn end_capture(&mut self) -> Result<(), CaptureError>;
}

/// Sink for the projector output.
pub trait PatternDisplay {
    fn show_pattern(&mut self, pattern: &Gray8) -> Result<(), CaptureError>;
    fn show_solid(&mut self, color: [u8; 3]) -> Result<(), CaptureError>;
}

/// Display sink for headless runs; drops every frame.
#[derive(Debug, Default)]
pub struct NullDisplay;

impl PatternDisplay for NullDisplay {
    fn show_pattern(&mut self, _pattern: &Gray8) -> Result<(), CaptureError> {
        Ok(())
    }

    fn show_solid(&mut self, _color: [u8; 3]) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Open the configured acquisition backend.
pub fn open_source(
    backend: Backend,
    replay_dir: Option<&Path>,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    match backend {
        Backend::Directory => {
            let dir = replay_dir.ok_or(CaptureError::ReplayDirMissing)?;
            Ok(Box::new(DirectoryFrameSource::new(dir)))
        }
        other => Err(CaptureError::Unsupported(other)),
    }
}

/// Query a frame, retrying transient unavailability.
pub fn query_frame_with_retries(
    source: &mut dyn FrameSource,
    retries: u32,
) -> Result<Rgb8, CaptureError> {
    let mut attempt = 0;
    loop {
        match source.query_frame() {
            Err(CaptureError::FrameUnavailable) if attempt < retries => {
                attempt += 1;
                warn!("frame unavailable, retry {attempt} of {retries}");
            }
            other => return other,
        }
    }
}

/// Replays previously captured frames from a directory, in file-name order.
///
/// Every image file in the directory is one frame; the projected patterns are
/// assumed to have been displayed in the same order during the recording.
pub struct DirectoryFrameSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    expected: (u32, u32),
    capturing: bool,
}

impl DirectoryFrameSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
            expected: (0, 0),
            capturing: false,
        }
    }

    /// Frames remaining in the replay.
    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.cursor)
    }
}

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "bmp"];

impl FrameSource for DirectoryFrameSource {
    fn init(&mut self, params: &ScanParams) -> Result<(), CaptureError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| CaptureError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CaptureError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_frame = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_frame {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(CaptureError::InitFailed(format!(
                "no frames in {}",
                self.dir.display()
            )));
        }

        self.files = files;
        self.cursor = 0;
        self.expected = (params.cam_width, params.cam_height);
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), CaptureError> {
        self.capturing = true;
        Ok(())
    }

    fn query_frame(&mut self) -> Result<Rgb8, CaptureError> {
        if !self.capturing || self.cursor >= self.files.len() {
            return Err(CaptureError::FrameUnavailable);
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;

        let decoded = image::open(path)
            .map_err(|source| CaptureError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();

        let (w, h) = decoded.dimensions();
        if (w, h) != self.expected {
            return Err(CaptureError::FrameSizeMismatch {
                got_w: w,
                got_h: h,
                want_w: self.expected.0,
                want_h: self.expected.1,
            });
        }

        let data = decoded.pixels().map(|p| p.0).collect();
        Rgb8::from_vec(w, h, data).ok_or(CaptureError::FrameUnavailable)
    }

    fn end_capture(&mut self) -> Result<(), CaptureError> {
        self.capturing = false;
        Ok(())
    }
}
