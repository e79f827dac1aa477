//! Matrix helpers for face alignment.
//!
//! Pure functions over `nalgebra` types. Nothing here holds state or logs;
//! callers decide how a degenerate input is reported.

use nalgebra::{Matrix2, Matrix2x3, Matrix4, Point2, Vector2};

/// Least-squares similarity transform (rotation, uniform scale, translation)
/// mapping `src` onto `dst`, after Umeyama (1991).
///
/// Returns the 2×3 affine matrix `[sR | t]`, or `None` when the point sets
/// differ in length, are empty, or `src` has no spread to estimate from.
pub fn umeyama(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix2x3<f64>> {
    if src.len() != dst.len() || src.is_empty() {
        return None;
    }
    let n = src.len() as f64;

    let src_mean = src.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let dst_mean = dst.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;

    let mut cov = Matrix2::<f64>::zeros();
    let mut src_var = 0.0f64;
    for (s, d) in src.iter().zip(dst) {
        let sc = s.coords - src_mean;
        let dc = d.coords - dst_mean;
        cov += dc * sc.transpose();
        src_var += sc.norm_squared();
    }
    cov /= n;
    src_var /= n;

    if src_var <= f64::EPSILON {
        return None;
    }

    let svd = cov.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let sigma = svd.singular_values;

    // Reflection guard: flip the weakest axis when the covariance is improper.
    let mut d = Vector2::new(1.0, 1.0);
    if cov.determinant() < 0.0 {
        d[1] = -1.0;
    }

    let tol = sigma.max() * 2.0 * f64::EPSILON;
    let rank = sigma.iter().filter(|&&s| s > tol).count();
    if rank == 0 {
        return None;
    }

    let rotation = if rank == 1 {
        if u.determinant() * v_t.determinant() > 0.0 {
            u * v_t
        } else {
            u * Matrix2::from_diagonal(&Vector2::new(1.0, -1.0)) * v_t
        }
    } else {
        u * Matrix2::from_diagonal(&d) * v_t
    };

    let scale = sigma.dot(&d) / src_var;
    let linear = rotation * scale;
    let t = dst_mean - linear * src_mean;

    Some(Matrix2x3::new(
        linear[(0, 0)],
        linear[(0, 1)],
        t.x,
        linear[(1, 0)],
        linear[(1, 1)],
        t.y,
    ))
}

/// Promote a 2D affine matrix into a 4×4 homogeneous one acting on x/y.
///
/// The z row/column stay identity; the translation lands in column 3.
pub fn affine_to_homogeneous(m: &Matrix2x3<f64>) -> Matrix4<f64> {
    let mut out = Matrix4::identity();
    out[(0, 0)] = m[(0, 0)];
    out[(0, 1)] = m[(0, 1)];
    out[(0, 3)] = m[(0, 2)];
    out[(1, 0)] = m[(1, 0)];
    out[(1, 1)] = m[(1, 1)];
    out[(1, 3)] = m[(1, 2)];
    out
}

/// Diagonal x/y scale as a 4×4 homogeneous matrix.
pub fn scale_xy(sx: f64, sy: f64) -> Matrix4<f64> {
    let mut out = Matrix4::identity();
    out[(0, 0)] = sx;
    out[(1, 1)] = sy;
    out
}

/// Flatten in row-major order.
pub fn to_row_major(m: &Matrix4<f64>) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for row in 0..4 {
        for col in 0..4 {
            out[row * 4 + col] = m[(row, col)] as f32;
        }
    }
    out
}

/// Rebuild a matrix from a row-major flattening.
pub fn from_row_major(values: &[f32; 16]) -> Matrix4<f64> {
    Matrix4::from_fn(|row, col| f64::from(values[row * 4 + col]))
}

/// Rotation about `center` by `angle_deg` (counter-clockwise in image
/// coordinates, y down) combined with an isotropic `scale`.
pub fn rotation_about(center: Point2<f64>, angle_deg: f64, scale: f64) -> Matrix2x3<f64> {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let alpha = scale * cos;
    let beta = scale * sin;
    Matrix2x3::new(
        alpha,
        beta,
        (1.0 - alpha) * center.x - beta * center.y,
        -beta,
        alpha,
        beta * center.x + (1.0 - alpha) * center.y,
    )
}

/// Apply a 2×3 affine matrix to a point.
pub fn apply_affine(m: &Matrix2x3<f64>, p: Point2<f64>) -> Point2<f64> {
    Point2::new(
        m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 2)],
        m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 2)],
    )
}

/// Apply a homogeneous 4×4 matrix to an (x, y) point with z = 0, w = 1.
pub fn apply_homogeneous(m: &Matrix4<f64>, p: Point2<f64>) -> Point2<f64> {
    let x = m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 3)];
    let y = m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 3)];
    let w = m[(3, 0)] * p.x + m[(3, 1)] * p.y + m[(3, 3)];
    Point2::new(x / w, y / w)
}
