use oblique_3d::homography::{apply_homography, find_homography, HomographyMethod, RansacParams};
use serde::{Deserialize, Serialize};

use crate::error::VelocityError;
use crate::points::TrackedPointSet;

/// Mean and population standard deviation of homography residuals along x and y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    /// Mean residual (x, y).
    pub mean: [f64; 2],
    /// Standard deviation of the residuals (x, y).
    pub std: [f64; 2],
}

impl ResidualStats {
    /// Compute the statistics of a set of residuals, NaN when it is empty.
    pub fn from_residuals(residuals: &[[f64; 2]]) -> Self {
        let n = residuals.len() as f64;
        let mean = [0, 1].map(|k| residuals.iter().map(|r| r[k]).sum::<f64>() / n);
        let std = [0, 1].map(|k| {
            let var = residuals
                .iter()
                .map(|r| (r[k] - mean[k]).powi(2))
                .sum::<f64>()
                / n;
            var.sqrt()
        });
        Self { mean, std }
    }

    /// Combined standard error `sqrt(std_x² + std_y²)` in pixels.
    pub fn std_error(&self) -> f64 {
        self.std[0].hypot(self.std[1])
    }
}

/// A homography fitted to the points tracked between two images.
#[derive(Debug, Clone, PartialEq)]
pub struct HomographyResult {
    /// Homography mapping source to destination points.
    pub matrix: [[f64; 3]; 3],
    /// Points in the first image.
    pub src: Vec<[f64; 2]>,
    /// Points in the second image.
    pub dst: Vec<[f64; 2]>,
    /// Source points mapped by the homography.
    pub predicted: Vec<[f64; 2]>,
    /// Destination minus predicted position of every point.
    pub residuals: Vec<[f64; 2]>,
    /// Summary of the residuals.
    pub stats: ResidualStats,
    /// Tracking error of every point.
    pub errors: Vec<f64>,
    /// Whether each point supports the robust fit.
    pub inliers: Vec<bool>,
}

/// Fit a homography to a tracked point set and measure how well it explains the motion.
///
/// # Arguments
///
/// * `points` - Points tracked between the two images.
/// * `method` - The robust estimator.
/// * `params` - The sampling parameters of the robust estimators.
///
/// # Errors
///
/// Returns [`VelocityError::HomographyFitFailure`] when fewer than four points are given
/// or no homography fits them.
pub fn estimate_homography(
    points: &TrackedPointSet,
    method: HomographyMethod,
    params: &RansacParams,
) -> Result<HomographyResult, VelocityError> {
    let (src, dst) = (points.seeds(), points.tracked());
    let fit = find_homography(src, dst, method, params)?;
    let predicted = apply_homography(src, &fit.matrix, false)?;

    let residuals = dst
        .iter()
        .zip(&predicted)
        .map(|(d, p)| [d[0] - p[0], d[1] - p[1]])
        .collect::<Vec<_>>();
    let stats = ResidualStats::from_residuals(&residuals);

    log::info!(
        "homography fitted with {} of {} inliers, residual mean ({:.3}, {:.3}) sd ({:.3}, {:.3}) px",
        fit.num_inliers(),
        src.len(),
        stats.mean[0],
        stats.mean[1],
        stats.std[0],
        stats.std[1]
    );

    Ok(HomographyResult {
        matrix: fit.matrix,
        src: src.to_vec(),
        dst: dst.to_vec(),
        predicted,
        residuals,
        stats,
        errors: points.errors().to_vec(),
        inliers: fit.inliers,
    })
}
