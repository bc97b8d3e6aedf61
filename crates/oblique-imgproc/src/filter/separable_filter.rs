use oblique_image::{Image, ImageError};
use rayon::prelude::*;

/// Apply a separable filter to an image.
///
/// The horizontal kernel is applied first and the vertical kernel on its result. Pixels
/// beyond the border are replicated from the closest valid pixel.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_x` - The horizontal kernel.
/// * `kernel_y` - The vertical kernel.
///
/// PRECONDITION: `src` and `dst` must have the same shape.
pub fn separable_filter<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    kernel_x: &[f32],
    kernel_y: &[f32],
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let (rows, cols) = (src.rows(), src.cols());
    if rows == 0 || cols == 0 {
        return Err(ImageError::EmptyImage(cols, rows));
    }

    let half_x = (kernel_x.len() / 2) as isize;
    let half_y = (kernel_y.len() / 2) as isize;
    let src_data = src.as_slice();

    // horizontal pass
    let mut temp = vec![0.0f32; src_data.len()];
    temp.par_chunks_exact_mut(cols * C)
        .zip(src_data.par_chunks_exact(cols * C))
        .for_each(|(temp_row, src_row)| {
            for c in 0..cols {
                let mut acc = [0.0f32; C];
                for (k, &w) in kernel_x.iter().enumerate() {
                    let xx = (c as isize + k as isize - half_x).clamp(0, cols as isize - 1);
                    let base = xx as usize * C;
                    for ch in 0..C {
                        acc[ch] += src_row[base + ch] * w;
                    }
                }
                temp_row[c * C..(c + 1) * C].copy_from_slice(&acc);
            }
        });

    // vertical pass
    dst.as_slice_mut()
        .par_chunks_exact_mut(cols * C)
        .enumerate()
        .for_each(|(r, dst_row)| {
            dst_row.iter_mut().for_each(|v| *v = 0.0);
            for (k, &w) in kernel_y.iter().enumerate() {
                let yy = (r as isize + k as isize - half_y).clamp(0, rows as isize - 1);
                let src_row = &temp[yy as usize * cols * C..(yy as usize + 1) * cols * C];
                dst_row
                    .iter_mut()
                    .zip(src_row.iter())
                    .for_each(|(d, &s)| *d += s * w);
            }
        });

    Ok(())
}
