//! Decoded camera-to-projector correspondence maps.
//!
//! One map is the output of decoding a full Gray-code capture: for every
//! camera pixel, the projector column and row that illuminate it, plus
//! validity. Validity is tracked per coded axis so that a pixel whose column
//! bits decoded cleanly but whose row bits were ambiguous can still be used
//! by the single-plane triangulation fallback.

use crate::math::{Pt2, Real};
use crate::params::CodeAxes;

/// Per-pixel projector coordinates decoded from a captured pattern sequence.
#[derive(Debug, Clone)]
pub struct CorrespondenceMap {
    width: u32,
    height: u32,
    axes: CodeAxes,
    col_code: Vec<u32>,
    row_code: Vec<u32>,
    col_valid: Vec<bool>,
    row_valid: Vec<bool>,
}

impl CorrespondenceMap {
    /// Allocate an all-invalid map at the camera resolution.
    pub fn new(width: u32, height: u32, axes: CodeAxes) -> Self {
        let n = (width as usize) * (height as usize);
        Self {
            width,
            height,
            axes,
            col_code: vec![0; n],
            row_code: vec![0; n],
            col_valid: vec![false; n],
            row_valid: vec![false; n],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn axes(&self) -> CodeAxes {
        self.axes
    }

    #[inline]
    fn idx(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + x as usize
    }

    pub fn set_column(&mut self, x: u32, y: u32, code: u32) {
        let i = self.idx(x, y);
        self.col_code[i] = code;
        self.col_valid[i] = true;
    }

    pub fn set_row(&mut self, x: u32, y: u32, code: u32) {
        let i = self.idx(x, y);
        self.row_code[i] = code;
        self.row_valid[i] = true;
    }

    /// Invalidate the pixel on both axes.
    pub fn invalidate(&mut self, x: u32, y: u32) {
        let i = self.idx(x, y);
        self.col_valid[i] = false;
        self.row_valid[i] = false;
    }

    pub fn invalidate_column(&mut self, x: u32, y: u32) {
        let i = self.idx(x, y);
        self.col_valid[i] = false;
    }

    pub fn invalidate_row(&mut self, x: u32, y: u32) {
        let i = self.idx(x, y);
        self.row_valid[i] = false;
    }

    /// Decoded projector column, if that axis was coded and decoded cleanly.
    pub fn column(&self, x: u32, y: u32) -> Option<u32> {
        let i = self.idx(x, y);
        (self.axes.has_columns() && self.col_valid[i]).then(|| self.col_code[i])
    }

    /// Decoded projector row, if that axis was coded and decoded cleanly.
    pub fn row(&self, x: u32, y: u32) -> Option<u32> {
        let i = self.idx(x, y);
        (self.axes.has_rows() && self.row_valid[i]).then(|| self.row_code[i])
    }

    /// A pixel is valid when at least one coded axis decoded cleanly.
    pub fn is_valid(&self, x: u32, y: u32) -> bool {
        self.column(x, y).is_some() || self.row(x, y).is_some()
    }

    /// A pixel decodes fully when every coded axis decoded cleanly.
    pub fn is_fully_valid(&self, x: u32, y: u32) -> bool {
        (!self.axes.has_columns() || self.column(x, y).is_some())
            && (!self.axes.has_rows() || self.row(x, y).is_some())
    }

    /// Number of valid pixels.
    pub fn valid_count(&self) -> usize {
        let mut count = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.is_valid(x, y) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Map a sub-pixel camera location to a sub-pixel projector location by
    /// bilinear interpolation of the decoded column and row fields.
    ///
    /// The full 3×3 neighbourhood around the nearest pixel must decode on
    /// both axes, otherwise the location is discarded. Requires both axes to
    /// be coded.
    pub fn interpolate_projector_pixel(&self, u: Real, v: Real) -> Option<Pt2> {
        if self.axes != CodeAxes::Both {
            return None;
        }

        let cu = u.round() as i64;
        let cv = v.round() as i64;
        for dy in -1..=1i64 {
            for dx in -1..=1i64 {
                let nx = cu + dx;
                let ny = cv + dy;
                if nx < 0 || ny < 0 || nx >= self.width as i64 || ny >= self.height as i64 {
                    return None;
                }
                if !self.is_fully_valid(nx as u32, ny as u32) {
                    return None;
                }
            }
        }

        let x0 = u.floor() as i64;
        let y0 = v.floor() as i64;
        if x0 < 0 || y0 < 0 || x0 + 1 >= self.width as i64 || y0 + 1 >= self.height as i64 {
            return None;
        }
        let fu = u - x0 as Real;
        let fv = v - y0 as Real;

        let sample = |codes: &[u32], x: i64, y: i64| -> Real {
            codes[(y as usize) * (self.width as usize) + x as usize] as Real
        };
        let bilinear = |codes: &[u32]| -> Option<Real> {
            let c00 = sample(codes, x0, y0);
            let c10 = sample(codes, x0 + 1, y0);
            let c01 = sample(codes, x0, y0 + 1);
            let c11 = sample(codes, x0 + 1, y0 + 1);
            for (x, y) in [(x0, y0), (x0 + 1, y0), (x0, y0 + 1), (x0 + 1, y0 + 1)] {
                if !self.is_fully_valid(x as u32, y as u32) {
                    return None;
                }
            }
            Some(
                c00 * (1.0 - fu) * (1.0 - fv)
                    + c10 * fu * (1.0 - fv)
                    + c01 * (1.0 - fu) * fv
                    + c11 * fu * fv,
            )
        };

        let col = bilinear(&self.col_code)?;
        let row = bilinear(&self.row_code)?;
        Some(Pt2::new(col, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_map(w: u32, h: u32) -> CorrespondenceMap {
        // Identity-like mapping scaled by 2 for easy interpolation checks.
        let mut map = CorrespondenceMap::new(w, h, CodeAxes::Both);
        for y in 0..h {
            for x in 0..w {
                map.set_column(x, y, 2 * x);
                map.set_row(x, y, 2 * y);
            }
        }
        map
    }

    #[test]
    fn fresh_map_is_all_invalid() {
        let map = CorrespondenceMap::new(8, 6, CodeAxes::Both);
        assert_eq!(map.valid_count(), 0);
        assert!(!map.is_valid(3, 3));
    }

    #[test]
    fn per_axis_validity() {
        let mut map = CorrespondenceMap::new(4, 4, CodeAxes::Both);
        map.set_column(1, 1, 5);
        assert!(map.is_valid(1, 1));
        assert!(!map.is_fully_valid(1, 1));
        assert_eq!(map.column(1, 1), Some(5));
        assert_eq!(map.row(1, 1), None);
    }

    #[test]
    fn uncoded_axis_yields_none() {
        let mut map = CorrespondenceMap::new(4, 4, CodeAxes::Columns);
        map.set_column(0, 0, 3);
        map.set_row(0, 0, 7);
        assert_eq!(map.column(0, 0), Some(3));
        assert_eq!(map.row(0, 0), None);
        assert!(map.is_fully_valid(0, 0));
    }

    #[test]
    fn interpolation_is_bilinear() {
        let map = filled_map(8, 8);
        let p = map.interpolate_projector_pixel(3.25, 4.5).unwrap();
        assert!((p.x - 6.5).abs() < 1e-12);
        assert!((p.y - 9.0).abs() < 1e-12);
    }

    #[test]
    fn interpolation_rejects_invalid_neighbourhood() {
        let mut map = filled_map(8, 8);
        map.invalidate(4, 5);
        // (3.25, 4.5) has (4, 5) inside its 3x3 neighbourhood.
        assert!(map.interpolate_projector_pixel(3.25, 4.5).is_none());
        // Far away pixels are unaffected.
        assert!(map.interpolate_projector_pixel(1.5, 1.5).is_some());
    }

    #[test]
    fn interpolation_rejects_image_border() {
        let map = filled_map(8, 8);
        assert!(map.interpolate_projector_pixel(0.2, 4.0).is_none());
        assert!(map.interpolate_projector_pixel(7.0, 7.0).is_none());
    }
}
