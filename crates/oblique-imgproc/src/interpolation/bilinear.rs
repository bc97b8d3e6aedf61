use oblique_image::Image;

/// Sample channel `c` of `image` at `(u, v)` by bilinear interpolation.
///
/// Coordinates outside the image are clamped to the border.
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
/// * `c` - The channel of the pixel to interpolate.
///
/// # Returns
///
/// The interpolated pixel value.
pub fn bilinear_interpolation<const C: usize>(
    image: &Image<f32, C>,
    u: f32,
    v: f32,
    c: usize,
) -> f32 {
    let (rows, cols) = (image.rows(), image.cols());

    let u = u.clamp(0.0, (cols - 1) as f32);
    let v = v.clamp(0.0, (rows - 1) as f32);

    let iu0 = u.trunc() as usize;
    let iv0 = v.trunc() as usize;

    let frac_u = u - iu0 as f32;
    let frac_v = v - iv0 as f32;

    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let data = image.as_slice();
    let px = |iu: usize, iv: usize| data[(iv * cols + iu) * C + c];

    let w00 = (1.0 - frac_u) * (1.0 - frac_v);
    let w01 = frac_u * (1.0 - frac_v);
    let w10 = (1.0 - frac_u) * frac_v;
    let w11 = frac_u * frac_v;

    px(iu0, iv0) * w00 + px(iu1, iv0) * w01 + px(iu0, iv1) * w10 + px(iu1, iv1) * w11
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_on_ramp() {
        let image = Image::<f32, 1>::from_fn([8, 8].into(), |x, y| [x as f32 + 10.0 * y as f32]);
        approx::assert_relative_eq!(bilinear_interpolation(&image, 3.25, 4.5, 0), 48.25, epsilon = 1e-4);
        // clamped to the last column and row
        approx::assert_relative_eq!(bilinear_interpolation(&image, 9.0, -2.0, 0), 7.0, epsilon = 1e-4);
    }
}
