//! Seeding of points in a first image and tracking them into a second one.
//!
//! Sparse seeds are Shi-Tomasi corners, dense seeds are a regular grid laid out over the
//! DEM and projected into the image. Seeds are tracked either with pyramidal Lucas-Kanade
//! checked by tracking back, or with template matching.

use oblique_3d::camera::CameraModel;
use oblique_3d::dem::Dem;
use oblique_image::Image;
use oblique_imgproc::features::{good_features_to_track, CornerParams};
use oblique_imgproc::optical_flow::{calc_optical_flow_pyr_lk, PyrLkParams};
use oblique_imgproc::template::{match_template_point, TemplateMatchMode};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::VelocityError;
use crate::pipeline::PairState;
use crate::points::{TrackedPointSet, TrackingErrorKind};

/// Parameters of optical flow tracking with back-tracking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackParams {
    /// Side of the square Lucas-Kanade window in pixels.
    pub window_size: usize,
    /// Points tracked back further than this from their seed are dropped, in pixels.
    pub backtrack_threshold: f64,
    /// Minimum number of points that must survive.
    pub min_features: usize,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            window_size: 25,
            backtrack_threshold: 1.0,
            min_features: 4,
        }
    }
}

impl TrackParams {
    fn pyr_lk(&self) -> PyrLkParams {
        PyrLkParams {
            win_size: (self.window_size, self.window_size),
            max_level: 2,
            max_iter: 10,
            epsilon: 0.03,
            ..Default::default()
        }
    }
}

/// Parameters of template matching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateParams {
    /// Side of the square template taken from the first image, in pixels.
    pub template_size: usize,
    /// Side of the square search window in the second image, in pixels.
    pub search_size: usize,
    /// Minimum number of points that must be matched.
    pub min_features: usize,
    /// The correlation measure.
    pub mode: TemplateMatchMode,
}

impl Default for TemplateParams {
    fn default() -> Self {
        Self {
            template_size: 10,
            search_size: 30,
            min_features: 4,
            mode: TemplateMatchMode::CCorrNormed,
        }
    }
}

/// A regular grid of world points and their projections into the image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseGrid {
    /// Grid nodes in world coordinates (x, y, z).
    pub world: Vec<[f64; 3]>,
    /// Projection of every node, NaN for nodes behind the camera.
    pub image: Vec<[f64; 2]>,
    /// Whether each node projects inside the image frame.
    pub in_frame: Vec<bool>,
}

impl DenseGrid {
    /// Number of grid nodes.
    pub fn len(&self) -> usize {
        self.world.len()
    }

    /// Whether the grid holds no node.
    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }
}

fn check_count(stage: PairState, actual: usize, required: usize) -> Result<(), VelocityError> {
    if actual < required {
        log::warn!("{stage:?}: {actual} points left, {required} required");
        return Err(VelocityError::InsufficientFeatures {
            stage,
            required,
            actual,
        });
    }
    Ok(())
}

/// Seed corners to track in an image.
///
/// # Arguments
///
/// * `image` - The grayscale image.
/// * `mask` - Optional mask, pixels equal to zero are not seeded.
/// * `params` - The corner detector parameters.
/// * `min_features` - Minimum number of corners.
///
/// # Errors
///
/// Returns [`VelocityError::InsufficientFeatures`] when fewer than `min_features` corners
/// are found.
pub fn seed_sparse(
    image: &Image<f32, 1>,
    mask: Option<&Image<u8, 1>>,
    params: &CornerParams,
    min_features: usize,
) -> Result<Vec<[f64; 2]>, VelocityError> {
    let corners = good_features_to_track(image, mask, params)?;
    check_count(PairState::Seed, corners.len(), min_features)?;
    log::info!("{} corners seeded", corners.len());

    Ok(corners
        .iter()
        .map(|c| [c.x as f64, c.y as f64])
        .collect())
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// Seed a regular grid over the DEM and project it into the image.
///
/// The grid has `round(width / spacing[0])` by `round(height / spacing[1])` nodes spread
/// evenly over the DEM extent, both ends included. Each node takes the height of its
/// nearest DEM cell and is dropped when that height is NaN or the cell is masked out.
///
/// # Arguments
///
/// * `dem` - The DEM to lay the grid over.
/// * `spacing` - The approximate node spacing along x and y in world units.
/// * `camera` - The camera projecting the nodes.
/// * `mask` - Optional per cell DEM mask in row-major order, false cells are skipped.
///
/// # Errors
///
/// Returns [`VelocityError::InvalidParameter`] for a non positive spacing or a mask that
/// does not match the DEM.
pub fn seed_dense<D: Dem + ?Sized>(
    dem: &D,
    spacing: [f64; 2],
    camera: &CameraModel,
    mask: Option<&[bool]>,
) -> Result<DenseGrid, VelocityError> {
    if !spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
        return Err(VelocityError::InvalidParameter(format!(
            "grid spacing must be positive, got {spacing:?}"
        )));
    }
    let heights = dem.heights();
    if let Some(mask) = mask {
        if mask.len() != heights.len() {
            return Err(VelocityError::InvalidParameter(format!(
                "DEM mask has {} cells, DEM has {}",
                mask.len(),
                heights.len()
            )));
        }
    }

    let extent = dem.extent();
    let nx = ((extent.x_max - extent.x_min) / spacing[0]).round() as usize;
    let ny = ((extent.y_max - extent.y_min) / spacing[1]).round() as usize;
    let xs = linspace(extent.x_min, extent.x_max, nx);
    let ys = linspace(extent.y_min, extent.y_max, ny);
    let cols = dem.shape().1;

    let mut world = Vec::with_capacity(nx * ny);
    for &y in &ys {
        for &x in &xs {
            let (r, c) = dem.nearest_index(x, y);
            let idx = r * cols + c;
            let z = heights[idx];
            if z.is_nan() || mask.is_some_and(|m| !m[idx]) {
                continue;
            }
            world.push([x, y, z]);
        }
    }

    let projection = camera.project(&world);
    log::info!("{} of {} grid points seeded", world.len(), nx * ny);

    Ok(DenseGrid {
        world,
        image: projection.uv,
        in_frame: projection.in_frame,
    })
}

/// Drop the points tracked back further than `threshold` from their seed.
///
/// The surviving points keep their order. Points with a NaN error are dropped.
///
/// # Errors
///
/// Returns [`VelocityError::InvalidParameter`] when the set does not carry back-tracking
/// distances.
pub fn filter_backtracked(
    set: &TrackedPointSet,
    threshold: f64,
) -> Result<TrackedPointSet, VelocityError> {
    if set.error_kind() != TrackingErrorKind::Backtrack {
        return Err(VelocityError::InvalidParameter(
            "point set has no back-tracking distances".to_string(),
        ));
    }
    let keep = set.errors().iter().map(|&d| d < threshold).collect::<Vec<_>>();
    set.retain(&keep)
}

/// Track points from `prev` to `next` with pyramidal Lucas-Kanade and check them by
/// tracking back.
///
/// Each point is tracked forward into `next` and the result tracked back into `prev`.
/// Points that fail either pass, or land `params.backtrack_threshold` pixels or more
/// from their seed, are dropped.
///
/// # Arguments
///
/// * `prev` - The image the seeds were found in.
/// * `next` - The image to track into.
/// * `seeds` - The points to track.
/// * `params` - The tracking parameters.
///
/// # Returns
///
/// The surviving points with their back-tracking distance as error.
///
/// # Errors
///
/// Returns [`VelocityError::InsufficientFeatures`] when fewer than `params.min_features`
/// points survive, or an image error when the images have different sizes.
pub fn track(
    prev: &Image<f32, 1>,
    next: &Image<f32, 1>,
    seeds: &[[f64; 2]],
    params: &TrackParams,
) -> Result<TrackedPointSet, VelocityError> {
    let lk = params.pyr_lk();
    let forward = calc_optical_flow_pyr_lk(prev, next, seeds, &lk)?;
    let backward = calc_optical_flow_pyr_lk(next, prev, &forward.next_pts, &lk)?;

    let distances = seeds
        .iter()
        .zip(&backward.next_pts)
        .zip(forward.status.iter().zip(&backward.status))
        .map(|((s, b), (&ok_fwd, &ok_bwd))| {
            if ok_fwd && ok_bwd {
                (s[0] - b[0]).hypot(s[1] - b[1])
            } else {
                f64::INFINITY
            }
        })
        .collect::<Vec<_>>();

    let all = TrackedPointSet::new(
        seeds.to_vec(),
        forward.next_pts,
        Some(backward.next_pts),
        distances,
        TrackingErrorKind::Backtrack,
    )?;
    let kept = filter_backtracked(&all, params.backtrack_threshold)?;
    check_count(PairState::Track, kept.len(), params.min_features)?;

    log::info!(
        "{} of {} points tracked, average back-tracking distance {:.3} px",
        kept.len(),
        seeds.len(),
        kept.mean_error()
    );
    Ok(kept)
}

/// Track points from `prev` to `next` by template matching.
///
/// A template around each point in `prev` is searched for in a larger window around the
/// same position in `next`. Points whose windows fall outside either image are dropped.
/// No back-tracking is done.
///
/// # Arguments
///
/// * `prev` - The image the points were seeded in.
/// * `next` - The image to match into.
/// * `points` - The points to match.
/// * `params` - The template matching parameters.
///
/// # Returns
///
/// The matched points with the mean of their correlation surface as error.
///
/// # Errors
///
/// Returns [`VelocityError::InsufficientFeatures`] when fewer than `params.min_features`
/// points are matched.
pub fn template_match(
    prev: &Image<f32, 1>,
    next: &Image<f32, 1>,
    points: &[[f64; 2]],
    params: &TemplateParams,
) -> Result<TrackedPointSet, VelocityError> {
    let matches = points
        .par_iter()
        .map(|&pt| {
            match_template_point(
                prev,
                next,
                pt,
                params.template_size,
                params.search_size,
                params.mode,
            )
            .map(|m| (pt, m.point, m.mean_correlation as f64))
        })
        .collect::<Vec<_>>();

    let mut seeds = Vec::with_capacity(points.len());
    let mut matched = Vec::with_capacity(points.len());
    let mut correlations = Vec::with_capacity(points.len());
    for (seed, point, corr) in matches.into_iter().flatten() {
        seeds.push(seed);
        matched.push(point);
        correlations.push(corr);
    }

    let set = TrackedPointSet::new(
        seeds,
        matched,
        None,
        correlations,
        TrackingErrorKind::Correlation,
    )?;
    check_count(PairState::Track, set.len(), params.min_features)?;

    log::info!(
        "{} of {} templates matched, average correlation {:.3}",
        set.len(),
        points.len(),
        set.mean_error()
    );
    Ok(set)
}
