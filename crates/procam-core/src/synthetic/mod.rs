//! Synthetic scenes and targets.
//!
//! These helpers build planar point grids, deterministic pose ramps, full
//! projector-camera scenes and rendered target images. They back the test
//! suites of every crate in the workspace; none of them touch the filesystem.

pub mod planar;
pub mod procam;
pub mod render;

pub use planar::*;
pub use procam::*;
pub use render::*;
