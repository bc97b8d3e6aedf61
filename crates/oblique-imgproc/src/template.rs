use oblique_image::{Image, ImageError, ImageSize};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::crop::crop_image;
use crate::interpolation::BicubicSpline;

/// Correlation measure used by [`match_template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateMatchMode {
    /// Sum of squared differences.
    SqDiff,
    /// Sum of squared differences normalized by the window energies.
    SqDiffNormed,
    /// Cross correlation.
    CCorr,
    /// Cross correlation normalized by the window energies.
    CCorrNormed,
    /// Cross correlation of the mean subtracted windows.
    CCoeff,
    /// Correlation coefficient of the windows.
    CCoeffNormed,
}

impl TemplateMatchMode {
    /// Whether the best match is the minimum of the correlation surface.
    pub fn prefers_minimum(&self) -> bool {
        matches!(self, Self::SqDiff | Self::SqDiffNormed)
    }
}

/// Minimum and maximum of a single channel image with their locations as (x, y).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxLoc {
    /// The minimum value.
    pub min_val: f32,
    /// The maximum value.
    pub max_val: f32,
    /// Location of the first minimum.
    pub min_loc: (usize, usize),
    /// Location of the first maximum.
    pub max_loc: (usize, usize),
}

/// Result of matching one point between two images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// Matched position of the point in the second image.
    pub point: [f64; 2],
    /// Mean of the correlation surface.
    pub mean_correlation: f32,
}

/// Slide `template` over `image` and compute the correlation surface.
///
/// The output has size `(W - w + 1, H - h + 1)` and each value is the score of the
/// template placed with its top left corner at that pixel.
///
/// # Errors
///
/// Returns an error when the template is larger than the image.
pub fn match_template(
    image: &Image<f32, 1>,
    template: &Image<f32, 1>,
    mode: TemplateMatchMode,
) -> Result<Image<f32, 1>, ImageError> {
    if template.cols() > image.cols()
        || template.rows() > image.rows()
        || template.cols() == 0
        || template.rows() == 0
    {
        return Err(ImageError::InvalidImageSize(
            image.cols(),
            image.rows(),
            template.cols(),
            template.rows(),
        ));
    }

    let out_size = ImageSize {
        width: image.cols() - template.cols() + 1,
        height: image.rows() - template.rows() + 1,
    };
    let (tw, th) = (template.cols(), template.rows());
    let n = (tw * th) as f32;
    let tdata = template.as_slice();
    let t_mean = tdata.iter().sum::<f32>() / n;
    let t_energy = tdata.iter().map(|t| t * t).sum::<f32>();
    let t_centered_energy = tdata.iter().map(|t| (t - t_mean).powi(2)).sum::<f32>();

    let idata = image.as_slice();
    let icols = image.cols();

    let mut out = Image::<f32, 1>::from_size_val(out_size, 0.0)?;
    out.as_slice_mut()
        .par_chunks_exact_mut(out_size.width)
        .enumerate()
        .for_each(|(oy, row)| {
            for (ox, score) in row.iter_mut().enumerate() {
                let (mut cross, mut i_sum, mut i_energy, mut sq_diff) = (0.0, 0.0, 0.0, 0.0);
                for ty in 0..th {
                    let ioff = (oy + ty) * icols + ox;
                    let toff = ty * tw;
                    for tx in 0..tw {
                        let i = idata[ioff + tx];
                        let t = tdata[toff + tx];
                        cross += i * t;
                        i_sum += i;
                        i_energy += i * i;
                        sq_diff += (i - t) * (i - t);
                    }
                }

                *score = match mode {
                    TemplateMatchMode::SqDiff => sq_diff,
                    TemplateMatchMode::SqDiffNormed => {
                        normalized(sq_diff, (t_energy * i_energy).sqrt(), 1.0)
                    }
                    TemplateMatchMode::CCorr => cross,
                    TemplateMatchMode::CCorrNormed => {
                        normalized(cross, (t_energy * i_energy).sqrt(), 0.0)
                    }
                    TemplateMatchMode::CCoeff => cross - t_mean * i_sum,
                    TemplateMatchMode::CCoeffNormed => {
                        let i_centered_energy = (i_energy - i_sum * i_sum / n).max(0.0);
                        normalized(
                            cross - t_mean * i_sum,
                            (t_centered_energy * i_centered_energy).sqrt(),
                            0.0,
                        )
                    }
                };
            }
        });

    Ok(out)
}

fn normalized(num: f32, denom: f32, degenerate: f32) -> f32 {
    if denom > f32::EPSILON {
        num / denom
    } else if num.abs() <= f32::EPSILON {
        0.0
    } else {
        degenerate
    }
}

/// Find the minimum and maximum of a single channel image.
///
/// Returns `None` for an empty image.
pub fn min_max_loc(src: &Image<f32, 1>) -> Option<MinMaxLoc> {
    let cols = src.cols();
    let data = src.as_slice();
    let first = *data.first()?;

    let mut res = MinMaxLoc {
        min_val: first,
        max_val: first,
        min_loc: (0, 0),
        max_loc: (0, 0),
    };
    for (idx, &v) in data.iter().enumerate() {
        if v < res.min_val {
            res.min_val = v;
            res.min_loc = (idx % cols, idx / cols);
        }
        if v > res.max_val {
            res.max_val = v;
            res.max_loc = (idx % cols, idx / cols);
        }
    }

    Some(res)
}

/// Refine an integer extremum of a correlation surface to sub-pixel precision.
///
/// A natural bicubic spline is fitted to the surface and searched within one pixel of
/// `loc`, first on a 0.1 pixel lattice and then on a 0.01 pixel lattice around the best
/// coarse sample.
pub fn refine_extremum(surface: &Image<f32, 1>, loc: (usize, usize), find_min: bool) -> [f64; 2] {
    let spline = BicubicSpline::new(surface);
    let max_x = surface.cols().saturating_sub(1) as f64;
    let max_y = surface.rows().saturating_sub(1) as f64;
    let sign = if find_min { -1.0 } else { 1.0 };

    let search = |center: [f64; 2], step: f64, steps: i32| {
        let mut best = (center, f64::NEG_INFINITY);
        for j in -steps..=steps {
            let y = center[1] + j as f64 * step;
            if y < 0.0 || y > max_y {
                continue;
            }
            for i in -steps..=steps {
                let x = center[0] + i as f64 * step;
                if x < 0.0 || x > max_x {
                    continue;
                }
                let v = sign * spline.eval(x, y);
                if v > best.1 {
                    best = ([x, y], v);
                }
            }
        }
        best.0
    };

    let coarse = search([loc.0 as f64, loc.1 as f64], 0.1, 10);
    search(coarse, 0.01, 10)
}

/// Match the neighbourhood of `pt` in `prev` against a search window in `next`.
///
/// A `template_size` square window centred on the point is taken from `prev` and searched
/// for in a `search_size` square window centred on the same position in `next`. The
/// matched position is the point displaced by the sub-pixel offset of the best score
/// relative to the zero displacement position.
///
/// Returns `None` when a window falls outside an image or the search window is smaller
/// than the template.
pub fn match_template_point(
    prev: &Image<f32, 1>,
    next: &Image<f32, 1>,
    pt: [f64; 2],
    template_size: usize,
    search_size: usize,
    mode: TemplateMatchMode,
) -> Option<TemplateMatch> {
    if !(pt[0].is_finite() && pt[1].is_finite()) || search_size < template_size {
        return None;
    }

    let origin = |size: usize| {
        let half = size as f64 / 2.0;
        ((pt[0] - half).floor(), (pt[1] - half).floor())
    };
    let (tx0, ty0) = origin(template_size);
    let (sx0, sy0) = origin(search_size);
    if sx0 < 0.0 || sy0 < 0.0 || tx0 < 0.0 || ty0 < 0.0 {
        return None;
    }

    let window = |src: &Image<f32, 1>, x0: f64, y0: f64, size: usize| {
        let mut dst = Image::<f32, 1>::from_size_val([size, size].into(), 0.0).ok()?;
        crop_image(src, &mut dst, x0 as usize, y0 as usize).ok()?;
        Some(dst)
    };
    let template = window(prev, tx0, ty0, template_size)?;
    let search = window(next, sx0, sy0, search_size)?;

    let surface = match_template(&search, &template, mode).ok()?;
    let extrema = min_max_loc(&surface)?;
    let loc = if mode.prefers_minimum() {
        extrema.min_loc
    } else {
        extrema.max_loc
    };
    let sub = refine_extremum(&surface, loc, mode.prefers_minimum());

    let data = surface.as_slice();
    let mean_correlation = data.iter().sum::<f32>() / data.len() as f32;

    Some(TemplateMatch {
        point: [
            pt[0] + sx0 + sub[0] - tx0,
            pt[1] + sy0 + sub[1] - ty0,
        ],
        mean_correlation,
    })
}
