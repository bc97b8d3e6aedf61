/// Compute the determinant of a 3x3 matrix.
pub fn det_mat33(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Invert a 3x3 matrix with the adjugate formula.
///
/// Returns `None` when the matrix is singular.
pub fn inverse_mat33(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = det_mat33(m);
    if det.abs() < f64::EPSILON || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;

    let mut inv = [[0.0; 3]; 3];
    inv[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det;
    inv[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det;
    inv[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det;
    inv[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det;
    inv[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det;
    inv[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det;
    inv[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det;
    inv[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det;
    inv[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det;

    Some(inv)
}

/// Multiply two 3x3 matrices.
pub fn mat33_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Scale a 3x3 matrix in place so that its bottom right entry is one.
///
/// The matrix is left untouched when that entry is zero.
pub fn normalize_mat33_inplace(m: &mut [[f64; 3]; 3]) {
    let s = m[2][2];
    if s.abs() < f64::EPSILON {
        return;
    }
    m.iter_mut().flatten().for_each(|v| *v /= s);
}

/// Orientation of the triangle `(a, b, c)`, positive when counter clockwise.
pub fn orient2d(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}
