use super::CameraIntrinsic;
use oblique_image::ImageSize;
use serde::{Deserialize, Serialize};

/// Represents the polynomial distortion parameters of a camera
///
/// The radial part is the rational model `(1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r² + k5 r⁴ + k6 r⁶)`
/// and the tangential part uses `p1` and `p2`, with the same ordering as OpenCV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolynomialDistortion {
    /// The first radial distortion coefficient
    pub k1: f64,
    /// The second radial distortion coefficient
    pub k2: f64,
    /// The third radial distortion coefficient
    pub k3: f64,
    /// The fourth radial distortion coefficient
    pub k4: f64,
    /// The fifth radial distortion coefficient
    pub k5: f64,
    /// The sixth radial distortion coefficient
    pub k6: f64,
    /// The first tangential distortion coefficient
    pub p1: f64,
    /// The second tangential distortion coefficient
    pub p2: f64,
}

impl PolynomialDistortion {
    /// Whether every coefficient is zero.
    pub fn is_identity(&self) -> bool {
        [
            self.k1, self.k2, self.k3, self.k4, self.k5, self.k6, self.p1, self.p2,
        ]
        .iter()
        .all(|&k| k == 0.0)
    }
}

// iterations of the fixed point undistortion
const UNDISTORT_MAX_ITER: usize = 20;
const UNDISTORT_EPS: f64 = 1e-12;

/// Distort a point given in normalized image coordinates.
///
/// # Arguments
///
/// * `x` - The normalized x coordinate.
/// * `y` - The normalized y coordinate.
/// * `distortion` - The distortion parameters of the camera.
/// * `max_r2` - Saturation of the squared radius, keeps the polynomial bounded far from the
///   optical axis. Pass `f64::INFINITY` to disable.
pub fn distort_normalized(
    x: f64,
    y: f64,
    distortion: &PolynomialDistortion,
    max_r2: f64,
) -> (f64, f64) {
    let d = distortion;
    let r2 = (x * x + y * y).min(max_r2);
    let r4 = r2 * r2;
    let r6 = r4 * r2;

    let mut kr = 1.0 + d.k1 * r2 + d.k2 * r4 + d.k3 * r6;
    if d.k4 != 0.0 || d.k5 != 0.0 || d.k6 != 0.0 {
        kr /= 1.0 + d.k4 * r2 + d.k5 * r4 + d.k6 * r6;
    }

    let xd = x * kr + 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
    let yd = y * kr + d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;

    (xd, yd)
}

/// Distort a point using polynomial distortion
///
/// # Arguments
///
/// * `x` - The x coordinate of the point
/// * `y` - The y coordinate of the point
/// * `intrinsic` - The intrinsic parameters of the camera
/// * `distortion` - The distortion parameters of the camera
///
/// # Returns
///
/// The pixel coordinates of the distorted point.
pub fn distort_point_polynomial(
    x: f64,
    y: f64,
    intrinsic: &CameraIntrinsic,
    distortion: &PolynomialDistortion,
) -> (f64, f64) {
    let (xn, yn) = intrinsic.normalize(x, y);
    let (xd, yd) = distort_normalized(xn, yn, distortion, f64::INFINITY);
    intrinsic.denormalize(xd, yd)
}

/// Remove the lens distortion from a pixel and return its normalized coordinates.
///
/// The inverse of the distortion model is found by fixed point iteration.
pub fn undistort_normalized(
    u: f64,
    v: f64,
    intrinsic: &CameraIntrinsic,
    distortion: &PolynomialDistortion,
) -> (f64, f64) {
    let (x0, y0) = intrinsic.normalize(u, v);
    if distortion.is_identity() {
        return (x0, y0);
    }

    let d = distortion;
    let (mut x, mut y) = (x0, y0);
    for _ in 0..UNDISTORT_MAX_ITER {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let icdist =
            (1.0 + d.k4 * r2 + d.k5 * r4 + d.k6 * r6) / (1.0 + d.k1 * r2 + d.k2 * r4 + d.k3 * r6);
        if icdist < 0.0 {
            return (x0, y0);
        }
        let delta_x = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
        let delta_y = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
        let (nx, ny) = ((x0 - delta_x) * icdist, (y0 - delta_y) * icdist);
        let step = (nx - x).abs() + (ny - y).abs();
        x = nx;
        y = ny;
        if step < UNDISTORT_EPS {
            break;
        }
    }

    (x, y)
}

/// Undistort pixel coordinates and reproject them with a new camera matrix.
///
/// # Arguments
///
/// * `points` - Distorted pixel coordinates as (x, y).
/// * `intrinsic` - The intrinsic parameters the points were observed with.
/// * `distortion` - The distortion parameters of the camera.
/// * `new_intrinsic` - The intrinsic parameters of the undistorted output.
///
/// # Returns
///
/// The undistorted pixel coordinates, index aligned with `points`.
pub fn undistort_points(
    points: &[[f64; 2]],
    intrinsic: &CameraIntrinsic,
    distortion: &PolynomialDistortion,
    new_intrinsic: &CameraIntrinsic,
) -> Vec<[f64; 2]> {
    points
        .iter()
        .map(|p| {
            let (x, y) = undistort_normalized(p[0], p[1], intrinsic, distortion);
            let (u, v) = new_intrinsic.denormalize(x, y);
            [u, v]
        })
        .collect()
}

/// Compute the new camera matrix for undistorted images.
///
/// `alpha = 0` keeps only valid pixels (the largest rectangle inscribed in the undistorted
/// image) and `alpha = 1` keeps every source pixel (the bounding rectangle). Values in between
/// interpolate linearly between both.
///
/// # Arguments
///
/// * `intrinsic` - The intrinsic parameters of the camera.
/// * `distortion` - The distortion parameters of the camera.
/// * `size` - The size of the image.
/// * `alpha` - Free scaling parameter in `[0, 1]`.
pub fn optimal_new_camera_matrix(
    intrinsic: &CameraIntrinsic,
    distortion: &PolynomialDistortion,
    size: ImageSize,
    alpha: f64,
) -> CameraIntrinsic {
    const N: usize = 9;
    let (w, h) = (size.width as f64, size.height as f64);

    let mut outer = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    let mut inner = (f64::MIN, f64::MIN, f64::MAX, f64::MAX);

    for iy in 0..N {
        for ix in 0..N {
            let u = ix as f64 * w / (N - 1) as f64;
            let v = iy as f64 * h / (N - 1) as f64;
            let (x, y) = undistort_normalized(u, v, intrinsic, distortion);

            outer.0 = outer.0.min(x);
            outer.1 = outer.1.min(y);
            outer.2 = outer.2.max(x);
            outer.3 = outer.3.max(y);

            if ix == 0 {
                inner.0 = inner.0.max(x);
            }
            if ix == N - 1 {
                inner.2 = inner.2.min(x);
            }
            if iy == 0 {
                inner.1 = inner.1.max(y);
            }
            if iy == N - 1 {
                inner.3 = inner.3.min(y);
            }
        }
    }

    let fit = |rect: (f64, f64, f64, f64)| {
        let fx = (w - 1.0) / (rect.2 - rect.0);
        let fy = (h - 1.0) / (rect.3 - rect.1);
        (fx, fy, -fx * rect.0, -fy * rect.1)
    };
    let (fx0, fy0, cx0, cy0) = fit(inner);
    let (fx1, fy1, cx1, cy1) = fit(outer);

    CameraIntrinsic {
        fx: fx0 * (1.0 - alpha) + fx1 * alpha,
        fy: fy0 * (1.0 - alpha) + fy1 * alpha,
        cx: cx0 * (1.0 - alpha) + cx1 * alpha,
        cy: cy0 * (1.0 - alpha) + cy1 * alpha,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsic() -> CameraIntrinsic {
        CameraIntrinsic {
            fx: 800.0,
            fy: 810.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    fn distortion() -> PolynomialDistortion {
        PolynomialDistortion {
            k1: -0.2,
            k2: 0.05,
            k3: 0.001,
            p1: 0.001,
            p2: -0.0005,
            ..Default::default()
        }
    }

    #[test]
    fn test_distort_point_identity() {
        let (x, y) = distort_point_polynomial(100.0, 20.0, &intrinsic(), &Default::default());
        approx::assert_relative_eq!(x, 100.0, epsilon = 1e-9);
        approx::assert_relative_eq!(y, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let k = intrinsic();
        let d = distortion();
        let pts = [[10.0, 15.0], [320.0, 240.0], [600.0, 400.0], [100.0, 450.0]];

        let distorted = pts
            .iter()
            .map(|p| {
                let (u, v) = distort_point_polynomial(p[0], p[1], &k, &d);
                [u, v]
            })
            .collect::<Vec<_>>();

        let undistorted = undistort_points(&distorted, &k, &d, &k);
        for (p, q) in pts.iter().zip(undistorted.iter()) {
            approx::assert_abs_diff_eq!(p[0], q[0], epsilon = 1e-6);
            approx::assert_abs_diff_eq!(p[1], q[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_distort_normalized_saturates_radius() {
        let d = PolynomialDistortion {
            k1: 0.1,
            ..Default::default()
        };
        let (x, _) = distort_normalized(3.0, 0.0, &d, 4.0);
        approx::assert_relative_eq!(x, 3.0 * (1.0 + 0.1 * 4.0), epsilon = 1e-12);
    }

    #[test]
    fn test_optimal_new_camera_matrix_without_distortion() {
        let k = intrinsic();
        let size = ImageSize {
            width: 641,
            height: 481,
        };
        let new_k = optimal_new_camera_matrix(&k, &Default::default(), size, 1.0);

        // the 9x9 lattice spans [0, W] so the fitted focal shrinks by (W - 1) / W
        approx::assert_relative_eq!(new_k.fx, 800.0 * 640.0 / 641.0, epsilon = 1e-9);
        approx::assert_relative_eq!(new_k.fy, 810.0 * 480.0 / 481.0, epsilon = 1e-9);
        approx::assert_relative_eq!(new_k.cx, 320.0 * 640.0 / 641.0, epsilon = 1e-9);

        let inner = optimal_new_camera_matrix(&k, &Default::default(), size, 0.0);
        approx::assert_relative_eq!(inner.fx, new_k.fx, epsilon = 1e-9);
    }

    #[test]
    fn test_optimal_new_camera_matrix_barrel() {
        let k = intrinsic();
        let size = ImageSize {
            width: 640,
            height: 480,
        };
        let d = distortion();
        let outer = optimal_new_camera_matrix(&k, &d, size, 1.0);
        let inner = optimal_new_camera_matrix(&k, &d, size, 0.0);

        // keeping every source pixel needs a wider field of view than the valid region
        assert!(outer.fx < inner.fx);
        assert!(outer.fy < inner.fy);
    }
}
