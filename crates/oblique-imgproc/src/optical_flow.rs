//! Sparse pyramidal Lucas-Kanade optical flow.
//!
//! Points are refined coarse to fine over a gaussian pyramid with Gauss-Newton
//! iterations on a rectangular window. Only single channel `f32` images are supported.

use oblique_image::{Image, ImageError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::filter::spatial_gradient;
use crate::interpolation::bilinear_interpolation;
use crate::pyramid::build_pyramid;

/// Parameters of the pyramidal Lucas-Kanade tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PyrLkParams {
    /// Size of the search window at each pyramid level, (width, height).
    pub win_size: (usize, usize),
    /// Index of the coarsest pyramid level, 0 means no pyramid.
    pub max_level: usize,
    /// Maximum number of Gauss-Newton iterations per level.
    pub max_iter: usize,
    /// Iterations stop once the update is shorter than this, in pixels.
    pub epsilon: f32,
    /// Minimum eigenvalue of the window gradient matrix divided by the window area.
    pub min_eigen_threshold: f32,
}

impl Default for PyrLkParams {
    fn default() -> Self {
        Self {
            win_size: (25, 25),
            max_level: 2,
            max_iter: 10,
            epsilon: 0.03,
            min_eigen_threshold: 1e-4,
        }
    }
}

/// Output of [`calc_optical_flow_pyr_lk`], index aligned with the input points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PyrLkResult {
    /// Tracked positions in the next image.
    pub next_pts: Vec<[f64; 2]>,
    /// Whether the point was tracked.
    pub status: Vec<bool>,
    /// Mean absolute intensity difference over the window at the finest level.
    pub error: Vec<f32>,
}

struct Level {
    prev: Image<f32, 1>,
    next: Image<f32, 1>,
    dx: Image<f32, 1>,
    dy: Image<f32, 1>,
}

/// Track points from `prev_img` to `next_img` with pyramidal Lucas-Kanade.
///
/// # Arguments
///
/// * `prev_img` - The image the points were found in.
/// * `next_img` - The image to track the points into.
/// * `prev_pts` - Points to track as (x, y) pixel coordinates.
/// * `params` - Tracker parameters.
///
/// # Errors
///
/// Returns an error when the two images have different sizes.
pub fn calc_optical_flow_pyr_lk(
    prev_img: &Image<f32, 1>,
    next_img: &Image<f32, 1>,
    prev_pts: &[[f64; 2]],
    params: &PyrLkParams,
) -> Result<PyrLkResult, ImageError> {
    if prev_img.size() != next_img.size() {
        return Err(ImageError::InvalidImageSize(
            prev_img.cols(),
            prev_img.rows(),
            next_img.cols(),
            next_img.rows(),
        ));
    }

    let prev_pyr = build_pyramid(prev_img, params.max_level)?;
    let next_pyr = build_pyramid(next_img, params.max_level)?;

    let levels = prev_pyr
        .into_iter()
        .zip(next_pyr)
        .map(|(prev, next)| {
            let mut dx = Image::from_size_val(prev.size(), 0.0)?;
            let mut dy = Image::from_size_val(prev.size(), 0.0)?;
            spatial_gradient(&prev, &mut dx, &mut dy)?;
            Ok(Level { prev, next, dx, dy })
        })
        .collect::<Result<Vec<_>, ImageError>>()?;

    let (width, height) = (prev_img.width() as f64, prev_img.height() as f64);

    let tracked = prev_pts
        .par_iter()
        .map(|&pt| {
            track_point(&levels, pt, params).filter(|(p, _)| {
                p[0] >= 0.0 && p[1] >= 0.0 && p[0] <= width - 1.0 && p[1] <= height - 1.0
            })
        })
        .collect::<Vec<_>>();

    let mut result = PyrLkResult {
        next_pts: Vec::with_capacity(prev_pts.len()),
        status: Vec::with_capacity(prev_pts.len()),
        error: Vec::with_capacity(prev_pts.len()),
    };
    for (track, &pt) in tracked.into_iter().zip(prev_pts) {
        match track {
            Some((next, err)) => {
                result.next_pts.push(next);
                result.status.push(true);
                result.error.push(err);
            }
            None => {
                result.next_pts.push(pt);
                result.status.push(false);
                result.error.push(f32::NAN);
            }
        }
    }

    Ok(result)
}

fn track_point(levels: &[Level], pt: [f64; 2], params: &PyrLkParams) -> Option<([f64; 2], f32)> {
    if !(pt[0].is_finite() && pt[1].is_finite()) {
        return None;
    }

    let half_w = (params.win_size.0 / 2) as isize;
    let half_h = (params.win_size.1 / 2) as isize;
    let area = ((2 * half_w + 1) * (2 * half_h + 1)) as f32;
    let eps_sq = params.epsilon * params.epsilon;

    // flow guess carried between levels, in the current level coordinates
    let mut guess = [0.0f32; 2];
    let mut error = 0.0f32;

    for (lvl, level) in levels.iter().enumerate().rev() {
        let scale = (1u32 << lvl) as f32;
        let px = pt[0] as f32 / scale;
        let py = pt[1] as f32 / scale;

        // template samples are fixed for the level
        let mut template = Vec::with_capacity(area as usize);
        let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
        for wy in -half_h..=half_h {
            for wx in -half_w..=half_w {
                let (x, y) = (px + wx as f32, py + wy as f32);
                let i0 = bilinear_interpolation(&level.prev, x, y, 0);
                let ix = bilinear_interpolation(&level.dx, x, y, 0);
                let iy = bilinear_interpolation(&level.dy, x, y, 0);
                a += ix * ix;
                b += ix * iy;
                c += iy * iy;
                template.push((wx, wy, i0, ix, iy));
            }
        }

        let det = a * c - b * b;
        let lambda_min = 0.5 * (a + c - ((a - c) * (a - c) + 4.0 * b * b).sqrt());
        if lambda_min / area < params.min_eigen_threshold || det.abs() < f32::EPSILON {
            return None;
        }

        let mut flow = guess;
        for _ in 0..params.max_iter {
            let (qx, qy) = (px + flow[0], py + flow[1]);
            let (mut bx, mut by) = (0.0f32, 0.0f32);
            let mut abs_diff = 0.0f32;
            for &(wx, wy, i0, ix, iy) in &template {
                let i1 = bilinear_interpolation(&level.next, qx + wx as f32, qy + wy as f32, 0);
                let it = i1 - i0;
                bx += ix * it;
                by += iy * it;
                abs_diff += it.abs();
            }
            error = abs_diff / area;

            let delta_x = -(c * bx - b * by) / det;
            let delta_y = -(a * by - b * bx) / det;
            if !(delta_x.is_finite() && delta_y.is_finite()) {
                return None;
            }
            flow[0] += delta_x;
            flow[1] += delta_y;

            if delta_x * delta_x + delta_y * delta_y < eps_sq {
                break;
            }
        }

        guess = if lvl > 0 {
            [flow[0] * 2.0, flow[1] * 2.0]
        } else {
            flow
        };
    }

    Some((
        [pt[0] + guess[0] as f64, pt[1] + guess[1] as f64],
        error,
    ))
}
