use crate::filter::{kernels, separable_filter};
use oblique_image::{Image, ImageError, ImageSize};

/// Blur an image and downsample it by a factor of two.
///
/// The output size is `((W + 1) / 2, (H + 1) / 2)`.
///
/// # Arguments
///
/// * `src` - The source image to be downsampled.
/// * `dst` - The destination image to store the result.
///
/// # Example
///
/// ```
/// use oblique_image::{Image, ImageSize};
/// use oblique_imgproc::pyramid::pyrdown;
///
/// let image = Image::<f32, 1>::from_size_val(ImageSize { width: 4, height: 4 }, 1.0).unwrap();
/// let mut down = Image::<f32, 1>::from_size_val(ImageSize { width: 2, height: 2 }, 0.0).unwrap();
///
/// pyrdown(&image, &mut down).unwrap();
/// assert_eq!(down.as_slice(), &[1.0; 4]);
/// ```
pub fn pyrdown<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
) -> Result<(), ImageError> {
    let expected_width = src.width().div_ceil(2);
    let expected_height = src.height().div_ceil(2);

    if dst.width() != expected_width || dst.height() != expected_height {
        return Err(ImageError::InvalidImageSize(
            expected_width,
            expected_height,
            dst.width(),
            dst.height(),
        ));
    }

    let kernel = kernels::pyramid_kernel_1d();
    let mut blurred = Image::<f32, C>::from_size_val(src.size(), 0.0)?;
    separable_filter(src, &mut blurred, &kernel, &kernel)?;

    let src_cols = src.cols();
    let dst_cols = dst.cols();
    let blurred_data = blurred.as_slice();
    dst.as_slice_mut()
        .chunks_exact_mut(dst_cols * C)
        .enumerate()
        .for_each(|(r, row)| {
            for c in 0..dst_cols {
                let base = ((2 * r) * src_cols + 2 * c) * C;
                row[c * C..(c + 1) * C].copy_from_slice(&blurred_data[base..base + C]);
            }
        });

    Ok(())
}

/// Build a gaussian pyramid with `max_level` downsampled levels on top of the source.
///
/// Level 0 is a copy of the source. Building stops early when a level would become
/// smaller than 2 pixels in any dimension.
pub fn build_pyramid<const C: usize>(
    src: &Image<f32, C>,
    max_level: usize,
) -> Result<Vec<Image<f32, C>>, ImageError> {
    let mut levels = Vec::with_capacity(max_level + 1);
    levels.push(src.clone());

    for _ in 0..max_level {
        let Some(prev) = levels.last() else {
            break;
        };
        let size = ImageSize {
            width: prev.width().div_ceil(2),
            height: prev.height().div_ceil(2),
        };
        if size.width < 2 || size.height < 2 {
            break;
        }
        let mut next = Image::<f32, C>::from_size_val(size, 0.0)?;
        pyrdown(prev, &mut next)?;
        levels.push(next);
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pyrdown() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::from_fn(
            ImageSize {
                width: 5,
                height: 3,
            },
            |x, _| [x as f32],
        );
        let mut dst = Image::<f32, 1>::from_size_val(
            ImageSize {
                width: 3,
                height: 2,
            },
            0.0,
        )?;

        pyrdown(&src, &mut dst)?;

        assert_eq!(dst.width(), 3);
        assert_eq!(dst.height(), 2);
        approx::assert_relative_eq!(dst.get_pixel(1, 0, 0)?, 2.0, epsilon = 1e-6);

        let mut wrong = Image::<f32, 1>::from_size_val([2, 2].into(), 0.0)?;
        assert!(pyrdown(&src, &mut wrong).is_err());

        Ok(())
    }

    #[test]
    fn test_build_pyramid() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::from_size_val([64, 48].into(), 1.0)?;
        let pyramid = build_pyramid(&src, 2)?;

        assert_eq!(pyramid.len(), 3);
        assert_eq!(pyramid[1].size(), [32, 24].into());
        assert_eq!(pyramid[2].size(), [16, 12].into());

        let tiny = Image::<f32, 1>::from_size_val([3, 3].into(), 1.0)?;
        assert_eq!(build_pyramid(&tiny, 3)?.len(), 2);

        Ok(())
    }
}
