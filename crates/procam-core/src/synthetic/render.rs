//! Rendered checkerboard target images.

use crate::image::Gray8;
use crate::math::{Iso3, Pt2, Real};
use crate::models::PinholeCamera;

/// Intensity of dark squares.
const BLACK_LEVEL: u8 = 25;
/// Intensity of light squares and of the surround.
const WHITE_LEVEL: u8 = 230;

/// Render the camera view of a checkerboard with `cols x rows` inner corners
/// and `square` side length, posed by `cam_from_board`.
///
/// Rays are cast through 2x2 sub-pixel positions and averaged, so edges are
/// softened enough for gradient-based corner refinement. The area outside the
/// board renders at the light level.
pub fn render_board_image(
    camera: &PinholeCamera,
    cam_from_board: &Iso3,
    cols: u32,
    rows: u32,
    square: Real,
    width: u32,
    height: u32,
) -> Gray8 {
    let mut img = Gray8::new(width, height, WHITE_LEVEL);

    let board_from_cam = cam_from_board.inverse();
    let normal = cam_from_board.rotation * nalgebra::Vector3::z();
    let origin = cam_from_board.translation.vector;
    let plane_offset = normal.dot(&origin);

    let offsets = [-0.25, 0.25];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0u32;
            for dy in offsets {
                for dx in offsets {
                    let pixel = Pt2::new(x as Real + dx, y as Real + dy);
                    let ray = camera.backproject_pixel(&pixel);
                    let denom = normal.dot(&ray);
                    let value = if denom.abs() < 1e-12 {
                        WHITE_LEVEL
                    } else {
                        let t = plane_offset / denom;
                        if t <= 0.0 {
                            WHITE_LEVEL
                        } else {
                            let hit = crate::math::Pt3::from(ray * t);
                            let on_board = board_from_cam.transform_point(&hit);
                            checker_level(on_board.x, on_board.y, cols, rows, square)
                        }
                    };
                    acc += value as u32;
                }
            }
            img.set(x, y, (acc / 4) as u8);
        }
    }
    img
}

/// Checker intensity at board-plane coordinates.
///
/// Squares cover `[-square, cols*square] x [-square, rows*square]` so the
/// inner corners sit at `(i*square, j*square)`.
fn checker_level(x: Real, y: Real, cols: u32, rows: u32, square: Real) -> u8 {
    let i = (x / square).floor();
    let j = (y / square).floor();
    if i < -1.0 || j < -1.0 || i >= cols as Real || j >= rows as Real {
        return WHITE_LEVEL;
    }
    if ((i as i64) + (j as i64)).rem_euclid(2) == 0 {
        BLACK_LEVEL
    } else {
        WHITE_LEVEL
    }
}
