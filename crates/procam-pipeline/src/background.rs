//! Background depth model for object/background segmentation.
//!
//! Scanning an empty scene fills the model; subsequent scans drop points that
//! coincide in depth with it. The session owns one model and resets it on
//! command.

use procam_core::{Image, Real, Rgb8};

use crate::triangulate::ScanReconstruction;

/// Per-camera-pixel depth of the empty scene plus a reference colour image.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    depth: Image<Real>,
    reference: Rgb8,
    mask: Image<bool>,
    populated: bool,
}

impl BackgroundModel {
    /// Allocate an unpopulated model: depth `+inf`, black reference, full mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: Image::new(width, height, Real::INFINITY),
            reference: Rgb8::new(width, height, [0, 0, 0]),
            mask: Image::new(width, height, true),
            populated: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Background depth at a pixel; `+inf` where the capture saw nothing.
    pub fn depth(&self, x: u32, y: u32) -> Real {
        *self.depth.get(x, y)
    }

    pub fn reference_image(&self) -> &Rgb8 {
        &self.reference
    }

    pub fn mask(&self, x: u32, y: u32) -> bool {
        *self.mask.get(x, y)
    }

    /// Restore the unpopulated defaults.
    pub fn reset(&mut self) {
        self.depth.as_mut_slice().fill(Real::INFINITY);
        self.reference.as_mut_slice().fill([0, 0, 0]);
        self.mask.as_mut_slice().fill(true);
        self.populated = false;
    }

    /// Replace the model with the depths of an object-free scan.
    ///
    /// Pixels the reconstruction left empty keep `+inf` depth and drop out of
    /// the mask; the all-white capture becomes the reference image.
    pub fn set_from_scan(&mut self, recon: &ScanReconstruction, light: &Rgb8) {
        for y in 0..self.height {
            for x in 0..self.width {
                let z = *recon.depth_map.get(x, y);
                self.depth.set(x, y, z);
                self.mask.set(x, y, z.is_finite());
            }
        }
        self.reference = light.clone();
        self.populated = true;
    }
}
