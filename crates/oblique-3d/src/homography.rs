use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::HomographyError;
use crate::linalg;

const MIN_POINTS: usize = 4;

/// Robust estimator used to fit a homography.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HomographyMethod {
    /// Random sample consensus with the inlier threshold in pixels.
    Ransac {
        /// Maximum transfer error of an inlier, in pixels.
        threshold: f64,
    },
    /// Least median of squares, robust up to half of the points being outliers.
    LeastMedian,
    /// Plain least squares over every correspondence.
    AllPoints,
}

impl Default for HomographyMethod {
    fn default() -> Self {
        Self::Ransac { threshold: 5.0 }
    }
}

/// Parameters of the random sampling estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RansacParams {
    /// Maximum number of sampled models.
    pub max_iterations: usize,
    /// Desired probability that at least one sample is outlier free.
    pub confidence: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Whether to refit the best model on all of its inliers.
    pub refine: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            confidence: 0.995,
            random_seed: None,
            refine: true,
        }
    }
}

/// A fitted homography and the correspondences that support it.
#[derive(Debug, Clone, PartialEq)]
pub struct HomographyFit {
    /// The homography mapping source to destination points, normalized so that `h[2][2] == 1`.
    pub matrix: [[f64; 3]; 3],
    /// Whether each correspondence is an inlier of the fit.
    pub inliers: Vec<bool>,
}

impl HomographyFit {
    /// Number of inliers.
    pub fn num_inliers(&self) -> usize {
        self.inliers.iter().filter(|&&i| i).count()
    }
}

// Hartley normalization, centroid at the origin and mean distance sqrt(2)
fn normalize_points_2d(x: &[[f64; 2]]) -> (Vec<[f64; 2]>, [[f64; 3]; 3]) {
    let n = x.len() as f64;
    let (mut mx, mut my) = (0.0, 0.0);
    for p in x {
        mx += p[0];
        my += p[1];
    }
    mx /= n;
    my /= n;

    let mean_dist = x
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 0.0 {
        2.0f64.sqrt() / mean_dist
    } else {
        1.0
    };

    let xn = x
        .iter()
        .map(|p| [(p[0] - mx) * scale, (p[1] - my) * scale])
        .collect();
    let t = [
        [scale, 0.0, -scale * mx],
        [0.0, scale, -scale * my],
        [0.0, 0.0, 1.0],
    ];
    (xn, t)
}

// smallest eigenvalue of the covariance of points centred at the origin
fn min_spread(x: &[[f64; 2]]) -> f64 {
    let n = x.len() as f64;
    let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
    for p in x {
        a += p[0] * p[0];
        b += p[0] * p[1];
        c += p[1] * p[1];
    }
    let (a, b, c) = (a / n, b / n, c / n);
    0.5 * (a + c - ((a - c).powi(2) + 4.0 * b * b).sqrt())
}

/// Fit a homography to correspondences with the normalized direct linear transform.
///
/// # Arguments
///
/// * `src` - Source points.
/// * `dst` - Destination points, index aligned with `src`.
///
/// # Returns
///
/// The homography mapping `src` to `dst` in the least squares sense, with `h[2][2] == 1`.
///
/// # Errors
///
/// Returns an error with fewer than four correspondences or when the points are
/// collinear.
pub fn homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<[[f64; 3]; 3], HomographyError> {
    check_input(src, dst)?;

    let (src_n, t1) = normalize_points_2d(src);
    let (dst_n, t2) = normalize_points_2d(dst);
    if min_spread(&src_n) < 1e-9 || min_spread(&dst_n) < 1e-9 {
        return Err(HomographyError::Degenerate);
    }

    // accumulate A^T A of the stacked 2x9 blocks
    let mut ata = [[0.0f64; 9]; 9];
    for (s, d) in src_n.iter().zip(dst_n.iter()) {
        let (x, y) = (s[0], s[1]);
        let (u, v) = (d[0], d[1]);
        let rows = [
            [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
            [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
        ];
        for r in &rows {
            for i in 0..9 {
                for j in i..9 {
                    ata[i][j] += r[i] * r[j];
                }
            }
        }
    }
    for i in 0..9 {
        for j in 0..i {
            ata[i][j] = ata[j][i];
        }
    }

    // the solution is the right singular vector of the smallest singular value
    let mat = faer::Mat::<f64>::from_fn(9, 9, |i, j| ata[i][j]);
    let svd = mat.svd();
    let h = svd.v().col(8);
    let hn = [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], h[8]]];

    // undo the normalization, H = T2^-1 Hn T1
    let s2 = t2[0][0];
    let t2_inv = [
        [1.0 / s2, 0.0, -t2[0][2] / s2],
        [0.0, 1.0 / s2, -t2[1][2] / s2],
        [0.0, 0.0, 1.0],
    ];
    let mut homo = linalg::mat33_mul(&t2_inv, &linalg::mat33_mul(&hn, &t1));

    if homo[2][2].abs() < f64::EPSILON {
        return Err(HomographyError::Degenerate);
    }
    linalg::normalize_mat33_inplace(&mut homo);

    let det = linalg::det_mat33(&homo);
    if !det.is_finite() || det.abs() < 1e-10 {
        return Err(HomographyError::Degenerate);
    }

    Ok(homo)
}

fn check_input(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<(), HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::MismatchedLengths {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.len() < MIN_POINTS {
        return Err(HomographyError::InsufficientPoints {
            required: MIN_POINTS,
            actual: src.len(),
        });
    }
    Ok(())
}

fn project_point(h: &[[f64; 3]; 3], p: [f64; 2]) -> [f64; 2] {
    let w = h[2][0] * p[0] + h[2][1] * p[1] + h[2][2];
    [
        (h[0][0] * p[0] + h[0][1] * p[1] + h[0][2]) / w,
        (h[1][0] * p[0] + h[1][1] * p[1] + h[1][2]) / w,
    ]
}

// squared transfer error of every correspondence, infinite when the projection fails
fn transfer_errors(h: &[[f64; 3]; 3], src: &[[f64; 2]], dst: &[[f64; 2]]) -> Vec<f64> {
    src.iter()
        .zip(dst)
        .map(|(&s, d)| {
            let p = project_point(h, s);
            let e = (p[0] - d[0]).powi(2) + (p[1] - d[1]).powi(2);
            if e.is_finite() {
                e
            } else {
                f64::INFINITY
            }
        })
        .collect()
}

fn collinear_sample(points: &[[f64; 2]; 4]) -> bool {
    const EPS: f64 = 1e-9;
    let combos = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    combos.iter().any(|&(a, b, c)| {
        let (pa, pb, pc) = (points[a], points[b], points[c]);
        let scale = ((pb[0] - pa[0]).hypot(pb[1] - pa[1]) * (pc[0] - pa[0]).hypot(pc[1] - pa[1]))
            .max(f64::MIN_POSITIVE);
        (linalg::orient2d(pa, pb, pc) / scale).abs() < EPS
    })
}

// fit a model on a random minimal sample, None when the sample is degenerate
fn sample_model(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    indices: &mut [usize],
    rng: &mut StdRng,
) -> Option<[[f64; 3]; 3]> {
    indices.shuffle(rng);
    let s: [[f64; 2]; 4] = std::array::from_fn(|k| src[indices[k]]);
    let d: [[f64; 2]; 4] = std::array::from_fn(|k| dst[indices[k]]);
    if collinear_sample(&s) || collinear_sample(&d) {
        return None;
    }
    homography_dlt(&s, &d).ok()
}

fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    let ws = inlier_ratio.powi(MIN_POINTS as i32);
    if ws >= 1.0 - 1e-12 {
        return 0;
    }
    if ws <= 1e-12 {
        return max_iterations;
    }
    let est = ((1.0 - confidence).max(1e-12).ln() / (1.0 - ws).ln()).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

fn ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    threshold: f64,
    params: &RansacParams,
    rng: &mut StdRng,
) -> Result<HomographyFit, HomographyError> {
    let n = src.len();
    let thresh_sq = threshold * threshold;
    let mut indices = (0..n).collect::<Vec<_>>();

    let mut best: Option<([[f64; 3]; 3], Vec<bool>, usize)> = None;
    let mut required = params.max_iterations;
    let mut iter = 0;
    while iter < required {
        iter += 1;
        let Some(model) = sample_model(src, dst, &mut indices, rng) else {
            continue;
        };

        let inliers = transfer_errors(&model, src, dst)
            .into_iter()
            .map(|e| e < thresh_sq)
            .collect::<Vec<_>>();
        let count = inliers.iter().filter(|&&i| i).count();

        if best.as_ref().map_or(true, |b| count > b.2) {
            required = required_iterations(count as f64 / n as f64, params.confidence, required);
            best = Some((model, inliers, count));
        }
    }

    let (model, inliers, count) = best.ok_or(HomographyError::Degenerate)?;
    if count < MIN_POINTS {
        return Err(HomographyError::InsufficientPoints {
            required: MIN_POINTS,
            actual: count,
        });
    }
    log::debug!("RANSAC homography: {count} of {n} inliers after {iter} iterations");

    refine(src, dst, model, inliers, params.refine, Some(thresh_sq))
}

fn least_median(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    params: &RansacParams,
    rng: &mut StdRng,
) -> Result<HomographyFit, HomographyError> {
    let n = src.len();
    let mut indices = (0..n).collect::<Vec<_>>();

    // the median is only stable when at least half of the samples are inliers
    let iterations = required_iterations(0.5, params.confidence, params.max_iterations).max(1);

    let mut best: Option<([[f64; 3]; 3], f64)> = None;
    for _ in 0..iterations {
        let Some(model) = sample_model(src, dst, &mut indices, rng) else {
            continue;
        };
        let mut errors = transfer_errors(&model, src, dst);
        errors.sort_by(f64::total_cmp);
        let median = errors[n / 2];
        if best.map_or(true, |b| median < b.1) {
            best = Some((model, median));
        }
    }

    let (model, median) = best.ok_or(HomographyError::Degenerate)?;

    // robust standard deviation of the residuals
    let sigma = 2.5 * 1.4826 * (1.0 + 5.0 / (n - MIN_POINTS).max(1) as f64) * median.sqrt();
    let thresh_sq = (sigma * sigma).max(1e-6);
    let inliers = transfer_errors(&model, src, dst)
        .into_iter()
        .map(|e| e <= thresh_sq)
        .collect::<Vec<_>>();
    log::debug!("LMedS homography: median squared error {median:.4}");

    refine(src, dst, model, inliers, params.refine, Some(thresh_sq))
}

fn refine(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    model: [[f64; 3]; 3],
    inliers: Vec<bool>,
    enabled: bool,
    thresh_sq: Option<f64>,
) -> Result<HomographyFit, HomographyError> {
    let (s, d): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&inliers)
        .filter(|(_, &inlier)| inlier)
        .map(|((&s, &d), _)| (s, d))
        .unzip();
    if !enabled || s.len() < MIN_POINTS {
        return Ok(HomographyFit {
            matrix: model,
            inliers,
        });
    }

    let Ok(matrix) = homography_dlt(&s, &d) else {
        return Ok(HomographyFit {
            matrix: model,
            inliers,
        });
    };
    let inliers = match thresh_sq {
        Some(t) => transfer_errors(&matrix, src, dst)
            .into_iter()
            .zip(inliers)
            .map(|(e, was)| was || e < t)
            .collect(),
        None => inliers,
    };
    Ok(HomographyFit { matrix, inliers })
}

/// Fit a homography from source to destination points.
///
/// # Arguments
///
/// * `src` - Source points.
/// * `dst` - Destination points, index aligned with `src`.
/// * `method` - The estimator.
/// * `params` - Sampling parameters of the robust estimators.
///
/// # Errors
///
/// Returns an error with fewer than four correspondences, mismatched lengths or when no
/// model could be fitted.
///
/// # Example
///
/// ```
/// use oblique_3d::homography::{find_homography, HomographyMethod, RansacParams};
///
/// let src = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [5.0, 3.0]];
/// let dst = src.map(|p| [p[0] + 2.0, p[1] - 1.0]);
///
/// let fit = find_homography(&src, &dst, HomographyMethod::AllPoints, &RansacParams::default())
///     .unwrap();
///
/// assert!((fit.matrix[0][2] - 2.0).abs() < 1e-9);
/// assert!((fit.matrix[1][2] + 1.0).abs() < 1e-9);
/// ```
pub fn find_homography(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    method: HomographyMethod,
    params: &RansacParams,
) -> Result<HomographyFit, HomographyError> {
    check_input(src, dst)?;

    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    match method {
        HomographyMethod::AllPoints => Ok(HomographyFit {
            matrix: homography_dlt(src, dst)?,
            inliers: vec![true; src.len()],
        }),
        HomographyMethod::Ransac { threshold } => ransac(src, dst, threshold, params, &mut rng),
        HomographyMethod::LeastMedian => least_median(src, dst, params, &mut rng),
    }
}

/// Apply a homography to points.
///
/// # Arguments
///
/// * `points` - The points to transform.
/// * `homography` - The 3x3 homography.
/// * `inverse` - Whether to apply the inverse of `homography`.
///
/// # Errors
///
/// Returns [`HomographyError::Singular`] when `inverse` is set and the matrix cannot be
/// inverted.
pub fn apply_homography(
    points: &[[f64; 2]],
    homography: &[[f64; 3]; 3],
    inverse: bool,
) -> Result<Vec<[f64; 2]>, HomographyError> {
    let h = if inverse {
        linalg::inverse_mat33(homography).ok_or(HomographyError::Singular)?
    } else {
        *homography
    };
    Ok(points.iter().map(|&p| project_point(&h, p)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;

    const H: [[f64; 3]; 3] = [
        [1.02, 0.03, 4.0],
        [-0.02, 0.98, -3.0],
        [1e-5, -2e-5, 1.0],
    ];

    fn grid_points() -> Vec<[f64; 2]> {
        let mut rng = StdRng::seed_from_u64(3);
        (0..60)
            .map(|_| [rng.random_range(0.0..640.0), rng.random_range(0.0..480.0)])
            .collect()
    }

    fn assert_mat_eq(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3], eps: f64) {
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(a[i][j], b[i][j], epsilon = eps);
            }
        }
    }

    #[test]
    fn test_dlt_exact() -> Result<(), HomographyError> {
        let src = grid_points();
        let dst = apply_homography(&src, &H, false)?;
        let homo = homography_dlt(&src[..4], &dst[..4])?;
        assert_mat_eq(&homo, &H, 1e-6);

        let homo = homography_dlt(&src, &dst)?;
        assert_mat_eq(&homo, &H, 1e-8);
        Ok(())
    }

    #[test]
    fn test_apply_inverse() -> Result<(), HomographyError> {
        let src = grid_points();
        let dst = apply_homography(&src, &H, false)?;
        let back = apply_homography(&dst, &H, true)?;
        for (a, b) in src.iter().zip(back.iter()) {
            assert_relative_eq!(a[0], b[0], epsilon = 1e-8);
            assert_relative_eq!(a[1], b[1], epsilon = 1e-8);
        }

        let singular = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]];
        assert_eq!(
            apply_homography(&src, &singular, true),
            Err(HomographyError::Singular)
        );
        Ok(())
    }

    fn with_outliers() -> Result<(Vec<[f64; 2]>, Vec<[f64; 2]>), HomographyError> {
        let src = grid_points();
        let mut dst = apply_homography(&src, &H, false)?;
        for p in dst.iter_mut().step_by(6) {
            p[0] += 80.0;
            p[1] -= 45.0;
        }
        Ok((src, dst))
    }

    #[test]
    fn test_robust_methods() -> Result<(), HomographyError> {
        let (src, dst) = with_outliers()?;
        let params = RansacParams {
            random_seed: Some(42),
            ..Default::default()
        };

        for method in [HomographyMethod::default(), HomographyMethod::LeastMedian] {
            let fit = find_homography(&src, &dst, method, &params)?;
            assert_mat_eq(&fit.matrix, &H, 1e-6);
            for (i, &inlier) in fit.inliers.iter().enumerate() {
                assert_eq!(inlier, i % 6 != 0, "{method:?} point {i}");
            }
            assert_eq!(fit.num_inliers(), 50);
        }

        // least squares is pulled away by the outliers
        let fit = find_homography(&src, &dst, HomographyMethod::AllPoints, &params)?;
        assert!((fit.matrix[0][2] - H[0][2]).abs() > 1e-3);
        Ok(())
    }

    #[test]
    fn test_errors() {
        let params = RansacParams::default();
        let pts = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        assert_eq!(
            find_homography(&pts, &pts, HomographyMethod::AllPoints, &params),
            Err(HomographyError::InsufficientPoints {
                required: 4,
                actual: 3
            })
        );
        assert_eq!(
            find_homography(&pts, &pts[..2], HomographyMethod::AllPoints, &params),
            Err(HomographyError::MismatchedLengths { src: 3, dst: 2 })
        );

        let line = (0..10).map(|i| [i as f64, 2.0 * i as f64]).collect::<Vec<_>>();
        assert_eq!(
            homography_dlt(&line, &line),
            Err(HomographyError::Degenerate)
        );
    }
}
