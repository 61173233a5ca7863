use nalgebra::DMatrix;
use procam_core::{to_homogeneous, Mat3, Pt2, Real};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate point configuration")]
    Degenerate,
}

/// Hartley normalization: translate the centroid to the origin and scale the
/// mean distance to sqrt(2). Returns the transformed points and the 3x3
/// similarity applied to them.
fn normalize_points(points: &[Pt2]) -> Result<(Vec<Pt2>, Mat3), HomographyError> {
    let n = points.len() as Real;
    let cx = points.iter().map(|p| p.x).sum::<Real>() / n;
    let cy = points.iter().map(|p| p.y).sum::<Real>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;
    if mean_dist < 1e-12 {
        return Err(HomographyError::Degenerate);
    }
    let scale = (2.0 as Real).sqrt() / mean_dist;

    let t = Mat3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    );
    let transformed = points
        .iter()
        .map(|p| Pt2::new(scale * (p.x - cx), scale * (p.y - cy)))
        .collect();
    Ok((transformed, t))
}

/// Solve `A x = 0` for the unit vector of the smallest singular value.
///
/// Pads the design matrix to at least as many rows as columns so the full
/// right singular basis is available from the thin SVD.
pub(crate) fn smallest_singular_vector(a: DMatrix<Real>) -> Result<Vec<Real>, HomographyError> {
    let a = if a.nrows() < a.ncols() {
        let (rows, cols) = (a.nrows(), a.ncols());
        let mut padded = DMatrix::<Real>::zeros(cols, cols);
        padded.view_mut((0, 0), (rows, cols)).copy_from(&a);
        padded
    } else {
        a
    };

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;
    Ok(v_t.row(v_t.nrows() - 1).iter().copied().collect())
}

/// Estimate H such that `image ~ H * world` using the normalized DLT.
pub fn dlt_homography(world: &[Pt2], image: &[Pt2]) -> Result<Mat3, HomographyError> {
    let n = world.len();
    if n < 4 || image.len() != n {
        return Err(HomographyError::NotEnoughPoints(n));
    }

    let (world_n, t_world) = normalize_points(world)?;
    let (image_n, t_image) = normalize_points(image)?;

    let mut a = DMatrix::<Real>::zeros(2 * n, 9);
    for (i, (pw, pi)) in world_n.iter().zip(image_n.iter()).enumerate() {
        let (x, y) = (pw.x, pw.y);
        let (u, v) = (pi.x, pi.y);

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h = smallest_singular_vector(a)?;
    let h_norm = Mat3::from_row_slice(&h);

    // Undo the normalizing similarities.
    let t_image_inv = t_image.try_inverse().ok_or(HomographyError::Degenerate)?;
    let mut h_mat = t_image_inv * h_norm * t_world;

    let scale = h_mat[(2, 2)];
    if scale.abs() > Real::EPSILON {
        h_mat /= scale;
    }

    Ok(h_mat)
}

/// Apply a homography to a point.
pub fn apply_homography(h: &Mat3, p: &Pt2) -> Pt2 {
    procam_core::from_homogeneous(&(h * to_homogeneous(p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_pure_scaling() {
        let w = vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(1.0, 0.0),
            Pt2::new(1.0, 1.0),
            Pt2::new(0.0, 1.0),
        ];
        let img: Vec<Pt2> = w.iter().map(|p| Pt2::new(2.0 * p.x, 2.0 * p.y)).collect();

        let h = dlt_homography(&w, &img).unwrap();
        assert!((h[(0, 0)] - 2.0).abs() < 1e-9);
        assert!((h[(1, 1)] - 2.0).abs() < 1e-9);
        assert!(h[(0, 1)].abs() < 1e-9);
    }

    #[test]
    fn maps_points_through_projective_warp() {
        let h_gt = Mat3::new(1.2, 0.1, 30.0, -0.05, 0.9, 12.0, 1e-4, -2e-4, 1.0);
        let world: Vec<Pt2> = (0..5)
            .flat_map(|j| (0..5).map(move |i| Pt2::new(i as Real * 20.0, j as Real * 20.0)))
            .collect();
        let image: Vec<Pt2> = world.iter().map(|p| apply_homography(&h_gt, p)).collect();

        let h = dlt_homography(&world, &image).unwrap();

        for (pw, pi) in world.iter().zip(image.iter()) {
            let mapped = apply_homography(&h, pw);
            assert!((mapped - pi).norm() < 1e-6, "residual {}", (mapped - pi).norm());
        }
    }

    #[test]
    fn too_few_points_is_an_error() {
        let pts = vec![Pt2::new(0.0, 0.0); 3];
        assert!(matches!(
            dlt_homography(&pts, &pts),
            Err(HomographyError::NotEnoughPoints(3))
        ));
    }

    #[test]
    fn coincident_points_are_degenerate() {
        let pts = vec![Pt2::new(1.0, 1.0); 6];
        assert!(dlt_homography(&pts, &pts).is_err());
    }
}
