use rayon::prelude::*;
use std::f64::consts::PI;

use crate::dem::Dem;

const MIN_BINS: usize = 360;
const MAX_BINS: usize = 65536;

/// Compute which DEM cells are in line of sight from `origin`.
///
/// Cells are visited from nearest to farthest. Each cell occludes the azimuth sector it
/// covers seen from the origin, and a cell is visible when its elevation angle reaches the
/// highest angle recorded so far in the sector of its centre. Cells with NaN elevation are
/// never visible and never occlude.
///
/// # Arguments
///
/// * `dem` - The elevation model.
/// * `origin` - The viewpoint as (x, y, z) world coordinates.
///
/// # Returns
///
/// The visibility of every cell, row-major.
pub fn viewshed<D: Dem + ?Sized>(dem: &D, origin: [f64; 3]) -> Vec<bool> {
    let (rows, cols) = dem.shape();
    let (xs, ys, zs) = (dem.x_coords(), dem.y_coords(), dem.heights());
    let (cell_x, cell_y) = dem.cell_size();
    let cell = cell_x.max(cell_y);

    // (distance, index) for every cell with a height
    let mut order = (0..rows * cols)
        .into_par_iter()
        .filter(|&i| zs[i].is_finite())
        .map(|i| {
            let (dx, dy) = (xs[i % cols] - origin[0], ys[i / cols] - origin[1]);
            ((dx * dx + dy * dy).sqrt(), i)
        })
        .collect::<Vec<_>>();
    order.par_sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut visible = vec![false; rows * cols];
    let Some(&(farthest, _)) = order.last() else {
        return visible;
    };

    // the sector width of the farthest cell sets the azimuth resolution
    let min_width = if farthest > 0.0 {
        2.0 * (cell / (2.0 * farthest)).atan()
    } else {
        2.0 * PI
    };
    let bins = ((2.0 * PI / min_width).ceil() as usize).clamp(MIN_BINS, MAX_BINS);
    let bin_width = 2.0 * PI / bins as f64;
    let mut horizon = vec![f64::NEG_INFINITY; bins];

    let to_bin = |angle: f64| -> isize { (angle / bin_width).floor() as isize };

    for (dist, i) in order {
        let (dx, dy) = (xs[i % cols] - origin[0], ys[i / cols] - origin[1]);
        if dist <= f64::EPSILON {
            visible[i] = true;
            continue;
        }
        let slope = (zs[i] - origin[2]) / dist;
        let azimuth = dy.atan2(dx).rem_euclid(2.0 * PI);
        let half = (cell / (2.0 * dist)).atan();

        let center = to_bin(azimuth).rem_euclid(bins as isize) as usize;
        if slope >= horizon[center] {
            visible[i] = true;
        }

        let (lo, hi) = (to_bin(azimuth - half), to_bin(azimuth + half));
        for b in lo..=hi {
            let b = b.rem_euclid(bins as isize) as usize;
            if slope > horizon[b] {
                horizon[b] = slope;
            }
        }
    }

    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::RasterDem;
    use crate::error::CameraError;

    fn axis(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * step).collect()
    }

    #[test]
    fn test_flat_dem_fully_visible() -> Result<(), CameraError> {
        let dem = RasterDem::from_fn(axis(20, 5.0), axis(15, 5.0), |_, _| 0.0)?;
        let visible = viewshed(&dem, [-10.0, 30.0, 50.0]);
        assert!(visible.iter().all(|&v| v));
        Ok(())
    }

    #[test]
    fn test_wall_hides_cells_behind_it() -> Result<(), CameraError> {
        // a 100 m wall at x = 50 seen from a low camera on the left
        let dem = RasterDem::from_fn(axis(21, 5.0), axis(11, 5.0), |x, _| {
            if x == 50.0 {
                100.0
            } else {
                0.0
            }
        })?;
        let visible = dem.visibility([-20.0, 25.0, 10.0]);
        let cols = 21;
        let row = 5;

        assert!(visible[row * cols + 2]);
        assert!(visible[row * cols + 10]);
        assert!((11..21).all(|c| !visible[row * cols + c]));
        Ok(())
    }

    #[test]
    fn test_nan_cells() -> Result<(), CameraError> {
        let dem = RasterDem::from_fn(axis(5, 1.0), axis(5, 1.0), |x, _| {
            if x == 2.0 {
                f64::NAN
            } else {
                0.0
            }
        })?;
        let visible = viewshed(&dem, [0.0, 0.0, 10.0]);
        for r in 0..5 {
            assert!(!visible[r * 5 + 2]);
            assert!(visible[r * 5 + 4]);
        }
        // the cell under the camera
        assert!(visible[0]);
        Ok(())
    }
}
