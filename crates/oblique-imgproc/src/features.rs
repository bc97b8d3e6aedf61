use oblique_image::{Image, ImageError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::filter::{box_blur, spatial_gradient};

/// Parameters of the Shi-Tomasi corner detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerParams {
    /// Maximum number of corners to return, strongest first.
    pub max_corners: usize,
    /// Minimum accepted response relative to the strongest corner in the image.
    pub quality_level: f32,
    /// Minimum euclidean distance in pixels between two returned corners.
    pub min_distance: f32,
    /// Size of the averaging block used to build the structure tensor.
    pub block_size: usize,
}

impl Default for CornerParams {
    fn default() -> Self {
        Self {
            max_corners: 50000,
            quality_level: 0.1,
            min_distance: 5.0,
            block_size: 3,
        }
    }
}

/// A detected corner with its minimum eigenvalue response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    /// Column of the corner in pixels.
    pub x: f32,
    /// Row of the corner in pixels.
    pub y: f32,
    /// Minimum eigenvalue of the structure tensor at the corner.
    pub score: f32,
}

/// Compute the minimum eigenvalue of the structure tensor at every pixel.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W).
/// * `dst` - The destination image with shape (H, W).
/// * `block_size` - Size of the box window used to average the gradient products.
pub fn min_eigen_response(
    src: &Image<f32, 1>,
    dst: &mut Image<f32, 1>,
    block_size: usize,
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let mut dx = Image::<f32, 1>::from_size_val(src.size(), 0.0)?;
    let mut dy = Image::<f32, 1>::from_size_val(src.size(), 0.0)?;
    spatial_gradient(src, &mut dx, &mut dy)?;

    // structure tensor entries packed as (dx2, dxy, dy2)
    let mut products = Image::<f32, 3>::from_size_val(src.size(), 0.0)?;
    products
        .as_slice_mut()
        .par_chunks_exact_mut(3)
        .zip(dx.as_slice().par_iter().zip(dy.as_slice().par_iter()))
        .for_each(|(p, (&gx, &gy))| {
            p[0] = gx * gx;
            p[1] = gx * gy;
            p[2] = gy * gy;
        });

    let mut tensor = Image::<f32, 3>::from_size_val(src.size(), 0.0)?;
    box_blur(&products, &mut tensor, (block_size, block_size))?;

    dst.as_slice_mut()
        .par_iter_mut()
        .zip(tensor.as_slice().par_chunks_exact(3))
        .for_each(|(d, t)| {
            let (a, b, c) = (t[0], t[1], t[2]);
            let half_trace = 0.5 * (a + c);
            let diff = 0.5 * (a - c);
            *d = half_trace - (diff * diff + b * b).sqrt();
        });

    Ok(())
}

/// Detect strong corners with the Shi-Tomasi criterion.
///
/// Corners are local 3x3 maxima of [`min_eigen_response`] above
/// `quality_level * max_response`, returned strongest first and at least
/// `min_distance` apart. Pixels where `mask` is zero are ignored.
///
/// # Arguments
///
/// * `src` - The grayscale source image.
/// * `mask` - Optional mask with the same size as `src`.
/// * `params` - The detector parameters.
///
/// # Errors
///
/// Returns an error when the mask size differs from the image size.
pub fn good_features_to_track(
    src: &Image<f32, 1>,
    mask: Option<&Image<u8, 1>>,
    params: &CornerParams,
) -> Result<Vec<Corner>, ImageError> {
    if let Some(mask) = mask {
        if mask.size() != src.size() {
            return Err(ImageError::InvalidImageSize(
                src.cols(),
                src.rows(),
                mask.cols(),
                mask.rows(),
            ));
        }
    }

    let mut response = Image::<f32, 1>::from_size_val(src.size(), 0.0)?;
    min_eigen_response(src, &mut response, params.block_size.max(1))?;

    let (rows, cols) = (src.rows(), src.cols());
    let resp = response.as_slice();
    let max_response = resp.iter().cloned().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        return Ok(Vec::new());
    }
    let threshold = params.quality_level * max_response;

    let is_masked = |idx: usize| mask.is_some_and(|m| m.as_slice()[idx] == 0);

    let mut candidates = (0..rows)
        .into_par_iter()
        .flat_map_iter(|r| {
            (0..cols).filter_map(move |c| {
                let idx = r * cols + c;
                let v = resp[idx];
                if v <= threshold || is_masked(idx) {
                    return None;
                }
                for yy in r.saturating_sub(1)..=(r + 1).min(rows - 1) {
                    for xx in c.saturating_sub(1)..=(c + 1).min(cols - 1) {
                        if resp[yy * cols + xx] > v {
                            return None;
                        }
                    }
                }
                Some(Corner {
                    x: c as f32,
                    y: r as f32,
                    score: v,
                })
            })
        })
        .collect::<Vec<_>>();

    // strongest first, ties broken by raster order for determinism
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    });

    Ok(enforce_min_distance(candidates, params, cols, rows))
}

fn enforce_min_distance(
    candidates: Vec<Corner>,
    params: &CornerParams,
    cols: usize,
    rows: usize,
) -> Vec<Corner> {
    if params.min_distance <= 0.0 {
        return candidates.into_iter().take(params.max_corners).collect();
    }

    // bucket the accepted corners so each candidate only checks neighbouring cells
    let cell = params.min_distance;
    let grid_w = (cols as f32 / cell).ceil() as usize + 1;
    let grid_h = (rows as f32 / cell).ceil() as usize + 1;
    let mut grid: Vec<Vec<(f32, f32)>> = vec![Vec::new(); grid_w * grid_h];
    let min_dist_sq = cell * cell;

    let mut corners = Vec::new();
    for corner in candidates {
        if corners.len() >= params.max_corners {
            break;
        }
        let gx = (corner.x / cell) as usize;
        let gy = (corner.y / cell) as usize;

        let mut too_close = false;
        'search: for yy in gy.saturating_sub(1)..=(gy + 1).min(grid_h - 1) {
            for xx in gx.saturating_sub(1)..=(gx + 1).min(grid_w - 1) {
                for &(px, py) in &grid[yy * grid_w + xx] {
                    let (ddx, ddy) = (px - corner.x, py - corner.y);
                    if ddx * ddx + ddy * ddy < min_dist_sq {
                        too_close = true;
                        break 'search;
                    }
                }
            }
        }

        if !too_close {
            grid[gy * grid_w + gx].push((corner.x, corner.y));
            corners.push(corner);
        }
    }

    corners
}

#[cfg(test)]
mod tests {
    use super::*;
    use oblique_image::ImageSize;

    fn checkerboard(size: ImageSize, square: usize) -> Image<f32, 1> {
        Image::from_fn(size, |x, y| {
            if ((x / square) + (y / square)) % 2 == 0 {
                [1.0]
            } else {
                [0.0]
            }
        })
    }

    #[test]
    fn test_min_eigen_response_flat_is_zero() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 10,
            height: 10,
        };
        let src = Image::<f32, 1>::from_size_val(size, 0.5)?;
        let mut dst = Image::<f32, 1>::from_size_val(size, 1.0)?;
        min_eigen_response(&src, &mut dst, 3)?;
        for &v in dst.as_slice() {
            approx::assert_abs_diff_eq!(v, 0.0, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_good_features_on_checkerboard() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 40,
            height: 40,
        };
        let src = checkerboard(size, 10);
        let params = CornerParams {
            min_distance: 5.0,
            ..Default::default()
        };

        let corners = good_features_to_track(&src, None, &params)?;
        assert!(!corners.is_empty());

        // every corner must sit close to an inner grid crossing
        for c in &corners {
            let nx = (c.x / 10.0).round() * 10.0;
            let ny = (c.y / 10.0).round() * 10.0;
            assert!((c.x - nx).abs() <= 2.0 && (c.y - ny).abs() <= 2.0, "{c:?}");
        }

        // strongest first and far enough apart
        for w in corners.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
        for (i, a) in corners.iter().enumerate() {
            for b in corners.iter().skip(i + 1) {
                let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                assert!(d >= 5.0);
            }
        }

        Ok(())
    }

    #[test]
    fn test_good_features_mask_and_cap() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 40,
            height: 40,
        };
        let src = checkerboard(size, 10);

        let mask = Image::<u8, 1>::from_fn(size, |x, _| [u8::from(x < 15)]);
        let corners = good_features_to_track(&src, Some(&mask), &CornerParams::default())?;
        assert!(!corners.is_empty());
        assert!(corners.iter().all(|c| c.x < 15.0));

        let capped = good_features_to_track(
            &src,
            None,
            &CornerParams {
                max_corners: 2,
                ..Default::default()
            },
        )?;
        assert_eq!(capped.len(), 2);

        let bad_mask = Image::<u8, 1>::from_size_val([10, 10].into(), 1)?;
        assert!(good_features_to_track(&src, Some(&bad_mask), &CornerParams::default()).is_err());

        Ok(())
    }
}
