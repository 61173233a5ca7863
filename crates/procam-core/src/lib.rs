//! Core math, camera models and data containers for `procam-scan`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - pinhole camera models (intrinsics + Brown-Conrady distortion),
//! - generic image buffers (`Image<T>`),
//! - the scan parameter record and the projector-camera calibration state,
//! - correspondence maps and point clouds produced by scanning,
//! - a generic RANSAC engine (`ransac`, [`Estimator`]),
//! - synthetic-scene helpers shared by the test suites.

/// Projector-camera calibration state with validity tracking.
pub mod calib;
/// Pixel-keyed sparse point clouds.
pub mod cloud;
/// Decoded camera-to-projector correspondence maps.
pub mod correspondence;
/// Generic image buffers.
pub mod image;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Camera models and distortion utilities.
pub mod models;
/// Scan parameters.
pub mod params;
/// Generic RANSAC engine and traits.
pub mod ransac;
/// Synthetic scenes for tests and examples.
pub mod synthetic;

pub use calib::*;
pub use cloud::*;
pub use correspondence::*;
pub use image::*;
pub use math::*;
pub use models::*;
pub use params::*;
pub use ransac::*;
