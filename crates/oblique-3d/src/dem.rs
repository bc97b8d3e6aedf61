use serde::{Deserialize, Serialize};

use crate::error::CameraError;
use crate::viewshed::viewshed;

/// Selects one of the coordinate grids of a DEM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemAxis {
    /// Easting of every cell.
    X,
    /// Northing of every cell.
    Y,
    /// Elevation of every cell.
    Z,
}

/// The bounding box of a DEM in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemExtent {
    /// Smallest easting.
    pub x_min: f64,
    /// Largest easting.
    pub x_max: f64,
    /// Smallest northing.
    pub y_min: f64,
    /// Largest northing.
    pub y_max: f64,
}

/// A regular grid of elevations.
///
/// Cells are stored row-major with `rows = y_coords().len()` and `cols = x_coords().len()`.
/// Coordinates along each axis are strictly monotonic, increasing or decreasing.
/// Missing elevations are NaN.
pub trait Dem: Send + Sync {
    /// Easting of every column.
    fn x_coords(&self) -> &[f64];

    /// Northing of every row.
    fn y_coords(&self) -> &[f64];

    /// Elevations in row-major order.
    fn heights(&self) -> &[f64];

    /// Number of rows and columns.
    fn shape(&self) -> (usize, usize) {
        (self.y_coords().len(), self.x_coords().len())
    }

    /// The bounding box of the cell centres.
    fn extent(&self) -> DemExtent {
        let (x, y) = (self.x_coords(), self.y_coords());
        let (x0, x1) = (x[0], x[x.len() - 1]);
        let (y0, y1) = (y[0], y[y.len() - 1]);
        DemExtent {
            x_min: x0.min(x1),
            x_max: x0.max(x1),
            y_min: y0.min(y1),
            y_max: y0.max(y1),
        }
    }

    /// Mean absolute spacing between cell centres along x and y.
    fn cell_size(&self) -> (f64, f64) {
        let spacing = |c: &[f64]| (c[c.len() - 1] - c[0]).abs() / (c.len() - 1) as f64;
        (spacing(self.x_coords()), spacing(self.y_coords()))
    }

    /// Bilinear elevation at `(x, y)`, NaN outside the grid.
    fn height(&self, x: f64, y: f64) -> f64 {
        let (Some((c, tx)), Some((r, ty))) =
            (bracket(self.x_coords(), x), bracket(self.y_coords(), y))
        else {
            return f64::NAN;
        };
        let cols = self.x_coords().len();
        let z = self.heights();
        let at = |r: usize, c: usize| z[r * cols + c];

        let top = (1.0 - tx) * at(r, c) + tx * at(r, c + 1);
        let bottom = (1.0 - tx) * at(r + 1, c) + tx * at(r + 1, c + 1);
        (1.0 - ty) * top + ty * bottom
    }

    /// Row and column of the cell closest to `(x, y)`, clamped to the grid.
    fn nearest_index(&self, x: f64, y: f64) -> (usize, usize) {
        (nearest(self.y_coords(), y), nearest(self.x_coords(), x))
    }

    /// One coordinate grid expanded to the full DEM shape, row-major.
    fn data(&self, axis: DemAxis) -> Vec<f64> {
        let (x, y) = (self.x_coords(), self.y_coords());
        match axis {
            DemAxis::X => y.iter().flat_map(|_| x.iter().copied()).collect(),
            DemAxis::Y => y
                .iter()
                .flat_map(|&yy| std::iter::repeat(yy).take(x.len()))
                .collect(),
            DemAxis::Z => self.heights().to_vec(),
        }
    }

    /// Which cells are in line of sight from `origin`, row-major.
    fn visibility(&self, origin: [f64; 3]) -> Vec<bool> {
        viewshed(self, origin)
    }
}

// index `i` and fraction `t` such that `v` lies between `coords[i]` and `coords[i + 1]`
fn bracket(coords: &[f64], v: f64) -> Option<(usize, f64)> {
    let n = coords.len();
    if n < 2 || !v.is_finite() {
        return None;
    }
    let increasing = coords[n - 1] > coords[0];
    let (lo, hi) = if increasing {
        (coords[0], coords[n - 1])
    } else {
        (coords[n - 1], coords[0])
    };
    if v < lo || v > hi {
        return None;
    }

    let k = if increasing {
        coords.partition_point(|&c| c <= v)
    } else {
        coords.partition_point(|&c| c >= v)
    };
    let i = k.saturating_sub(1).min(n - 2);
    let t = (v - coords[i]) / (coords[i + 1] - coords[i]);
    Some((i, t.clamp(0.0, 1.0)))
}

fn nearest(coords: &[f64], v: f64) -> usize {
    match bracket(coords, v) {
        Some((i, t)) if t > 0.5 => i + 1,
        Some((i, _)) => i,
        None => {
            let first = coords[0];
            let last = coords[coords.len() - 1];
            if (v - first).abs() <= (v - last).abs() {
                0
            } else {
                coords.len() - 1
            }
        }
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n)
        .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
        .collect()
}

/// An elevation grid held in memory.
///
/// # Example
///
/// ```
/// use oblique_3d::dem::{Dem, RasterDem};
///
/// let dem = RasterDem::from_fn(vec![0.0, 10.0, 20.0], vec![0.0, 10.0], |x, _| x / 10.0)
///     .unwrap();
///
/// assert_eq!(dem.shape(), (2, 3));
/// assert_eq!(dem.height(15.0, 5.0), 1.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDem {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
}

impl RasterDem {
    /// Create a DEM from its axis coordinates and row-major elevations.
    ///
    /// # Arguments
    ///
    /// * `x` - Easting of every column, strictly monotonic.
    /// * `y` - Northing of every row, strictly monotonic.
    /// * `z` - Elevations with `y.len() * x.len()` entries.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidDem`] when an axis has fewer than two samples, is not
    /// strictly monotonic or when `z` has the wrong length.
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Result<Self, CameraError> {
        for (name, axis) in [("x", &x), ("y", &y)] {
            if axis.len() < 2 {
                return Err(CameraError::InvalidDem(format!(
                    "{name} axis needs at least 2 samples, got {}",
                    axis.len()
                )));
            }
            let increasing = axis.windows(2).all(|w| w[1] > w[0]);
            let decreasing = axis.windows(2).all(|w| w[1] < w[0]);
            if !(increasing || decreasing) {
                return Err(CameraError::InvalidDem(format!(
                    "{name} axis is not strictly monotonic"
                )));
            }
        }
        if z.len() != x.len() * y.len() {
            return Err(CameraError::InvalidDem(format!(
                "expected {} elevations, got {}",
                x.len() * y.len(),
                z.len()
            )));
        }
        Ok(Self { x, y, z })
    }

    /// Create a DEM by evaluating `f(x, y)` at every cell.
    pub fn from_fn(
        x: Vec<f64>,
        y: Vec<f64>,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self, CameraError> {
        let z = y
            .iter()
            .flat_map(|&yy| x.iter().map(move |&xx| (xx, yy)))
            .map(|(xx, yy)| f(xx, yy))
            .collect();
        Self::new(x, y, z)
    }

    /// Resample the grid with `factor` times as many intervals along each axis.
    ///
    /// New elevations are bilinear interpolations of the original grid.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidDem`] when `factor` is zero.
    pub fn densify(&self, factor: usize) -> Result<Self, CameraError> {
        if factor == 0 {
            return Err(CameraError::InvalidDem(
                "densification factor must be positive".to_string(),
            ));
        }
        if factor == 1 {
            return Ok(self.clone());
        }

        let x = linspace(self.x[0], self.x[self.x.len() - 1], (self.x.len() - 1) * factor + 1);
        let y = linspace(self.y[0], self.y[self.y.len() - 1], (self.y.len() - 1) * factor + 1);
        log::debug!(
            "densified DEM from {}x{} to {}x{}",
            self.y.len(),
            self.x.len(),
            y.len(),
            x.len()
        );
        Self::from_fn(x, y, |xx, yy| self.height(xx, yy))
    }

    /// Flag the cells whose centre lies inside `polygon`, row-major.
    ///
    /// # Arguments
    ///
    /// * `polygon` - The polygon vertices in world (x, y) coordinates.
    pub fn polygon_mask(&self, polygon: &[[f64; 2]]) -> Vec<bool> {
        self.y
            .iter()
            .flat_map(|&yy| {
                self.x
                    .iter()
                    .map(move |&xx| oblique_imgproc::draw::point_in_polygon(xx, yy, polygon))
            })
            .collect()
    }

    /// Replace the elevation of the cells outside `mask` with NaN.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidDem`] when the mask does not cover every cell.
    pub fn apply_mask(&mut self, mask: &[bool]) -> Result<(), CameraError> {
        if mask.len() != self.z.len() {
            return Err(CameraError::InvalidDem(format!(
                "mask has {} cells, DEM has {}",
                mask.len(),
                self.z.len()
            )));
        }
        for (z, &keep) in self.z.iter_mut().zip(mask) {
            if !keep {
                *z = f64::NAN;
            }
        }
        Ok(())
    }
}

impl Dem for RasterDem {
    fn x_coords(&self) -> &[f64] {
        &self.x
    }

    fn y_coords(&self) -> &[f64] {
        &self.y
    }

    fn heights(&self) -> &[f64] {
        &self.z
    }
}
