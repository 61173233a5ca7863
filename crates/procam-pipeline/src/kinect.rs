//! Kinect depth-mapping helper.
//!
//! The Kinect backend ships with a fixed factory calibration relating its
//! depth sensor, world coordinates and RGB camera. The mapping is independent
//! of the projector-camera calibration: it turns a raw depth frame directly
//! into per-pixel 3D samples, acting as a pre-supplied alternative to the
//! structured-light triangulator.

use procam_core::{Image, Pt2, Pt3, Real};

/// Raw depth readings at or above this value flag a dropped measurement.
pub const DEPTH_SATURATED: u16 = 0x07ff;
/// Depth sensor resolution.
pub const DEPTH_WIDTH: u32 = 640;
pub const DEPTH_HEIGHT: u32 = 480;

const MIN_DISTANCE: Real = -10.0;
const DEPTH_SCALE: Real = 0.0021;
const COLOR_SCALE: Real = 0.0023;
const RGB_X_OFFSET: Real = -1.8;
const RGB_Y_OFFSET: Real = -2.4;

/// Whether a raw 11-bit depth reading carries a measurement.
pub fn is_depth_valid(raw: u16) -> bool {
    raw > 0 && raw != DEPTH_SATURATED
}

/// Metric depth of a raw 11-bit reading.
pub fn depth_value_to_z(raw: u16) -> Real {
    100.0 / (-0.00307 * raw as Real + 3.33)
}

/// World-space point of a depth pixel `(u, v)` at metric depth `z`.
pub fn depth_to_world(u: Real, v: Real, z: Real) -> Pt3 {
    let x = (u - (DEPTH_WIDTH / 2) as Real) * (z + MIN_DISTANCE) * DEPTH_SCALE;
    let y = (v - (DEPTH_HEIGHT / 2) as Real) * (z + MIN_DISTANCE) * DEPTH_SCALE;
    Pt3::new(x, y, -(z - 200.0))
}

/// RGB-image pixel seeing a world-space point, clamped to the sensor extent.
pub fn world_to_rgb(p: &Pt3) -> Pt2 {
    let z = -p.z + 200.0;
    let u = ((p.x + RGB_X_OFFSET) / COLOR_SCALE) / (z + MIN_DISTANCE) + (DEPTH_WIDTH / 2) as Real;
    let v = ((p.y + RGB_Y_OFFSET) / COLOR_SCALE) / (z + MIN_DISTANCE) + (DEPTH_HEIGHT / 2) as Real;
    Pt2::new(
        u.clamp(0.0, DEPTH_WIDTH as Real),
        v.clamp(0.0, DEPTH_HEIGHT as Real),
    )
}

/// Map a raw depth frame to per-pixel world points.
///
/// Invalid readings yield `None`, mirroring the invalid mask of a
/// structured-light scan.
pub fn depth_frame_to_points(depth: &Image<u16>) -> Vec<Option<Pt3>> {
    let mut points = Vec::with_capacity(depth.len());
    for v in 0..depth.height() {
        for u in 0..depth.width() {
            let raw = *depth.get(u, v);
            points.push(is_depth_valid(raw).then(|| {
                depth_to_world(u as Real, v as Real, depth_value_to_z(raw))
            }));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_excludes_zero_and_saturation() {
        assert!(!is_depth_valid(0));
        assert!(!is_depth_valid(DEPTH_SATURATED));
        assert!(is_depth_valid(1));
        assert!(is_depth_valid(1000));
    }

    #[test]
    fn depth_grows_with_raw_value() {
        let near = depth_value_to_z(300);
        let far = depth_value_to_z(900);
        assert!(near > 0.0);
        assert!(far > near, "near {near}, far {far}");
    }

    #[test]
    fn center_pixel_maps_to_the_optical_axis() {
        let p = depth_to_world(320.0, 240.0, depth_value_to_z(700));
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 0.0);
    }

    #[test]
    fn rgb_mapping_inverts_the_depth_convention() {
        // world_to_rgb undoes the z flip of depth_to_world, so the implied
        // sensor depth matches and the pixel stays near the centre for an
        // on-axis point.
        let z = depth_value_to_z(800);
        let world = depth_to_world(320.0, 240.0, z);
        let rgb = world_to_rgb(&world);
        assert!((rgb.x - 320.0).abs() < 10.0, "u {}", rgb.x);
        assert!((rgb.y - 240.0).abs() < 10.0, "v {}", rgb.y);
    }

    #[test]
    fn rgb_pixels_are_clamped_to_the_sensor() {
        let far_off = Pt3::new(1e6, -1e6, 50.0);
        let rgb = world_to_rgb(&far_off);
        assert_eq!(rgb.x, DEPTH_WIDTH as Real);
        assert_eq!(rgb.y, 0.0);
    }

    #[test]
    fn depth_frame_mapping_skips_invalid_readings() {
        let mut frame = Image::new(4, 3, 0u16);
        frame.set(1, 1, 750);
        frame.set(2, 2, DEPTH_SATURATED);

        let points = depth_frame_to_points(&frame);
        assert_eq!(points.len(), 12);
        assert!(points[4 + 1].is_some());
        assert!(points[2 * 4 + 2].is_none());
        assert!(points[0].is_none());
    }
}
