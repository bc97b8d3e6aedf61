use oblique_image::{Image, ImageError, ImageSize};
use rayon::prelude::*;

/// Test whether a point lies inside a polygon with the even-odd rule.
///
/// # Arguments
///
/// * `x` - The x coordinate of the point.
/// * `y` - The y coordinate of the point.
/// * `polygon` - The polygon vertices in order, the closing edge is implicit.
pub fn point_in_polygon(x: f64, y: f64, polygon: &[[f64; 2]]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Rasterize a polygon into a mask image.
///
/// Pixels whose centre lies inside the polygon are set to 1, the rest to 0.
///
/// # Arguments
///
/// * `size` - The size of the mask.
/// * `polygon` - The polygon vertices in pixel coordinates.
pub fn polygon_mask(size: ImageSize, polygon: &[[f64; 2]]) -> Result<Image<u8, 1>, ImageError> {
    let mut mask = Image::<u8, 1>::from_size_val(size, 0)?;
    let cols = size.width;
    if cols == 0 {
        return Ok(mask);
    }

    mask.as_slice_mut()
        .par_chunks_exact_mut(cols)
        .enumerate()
        .for_each(|(r, row)| {
            for (c, px) in row.iter_mut().enumerate() {
                *px = u8::from(point_in_polygon(c as f64, r as f64, polygon));
            }
        });

    Ok(mask)
}
