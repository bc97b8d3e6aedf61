use oblique_image::{Image, ImageError};

use super::{kernels, separable_filter};

/// Blur an image using a box blur filter
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_size` - The size of the kernel (kernel_x, kernel_y).
///
/// PRECONDITION: `src` and `dst` must have the same shape.
pub fn box_blur<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    kernel_size: (usize, usize),
) -> Result<(), ImageError> {
    let kernel_x = kernels::box_blur_kernel_1d(kernel_size.0);
    let kernel_y = kernels::box_blur_kernel_1d(kernel_size.1);
    separable_filter(src, dst, &kernel_x, &kernel_y)
}

/// Compute the first order spatial gradients of a grayscale image with 3x3 sobel kernels.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, 1).
/// * `dx` - The horizontal derivative with shape (H, W, 1).
/// * `dy` - The vertical derivative with shape (H, W, 1).
pub fn spatial_gradient(
    src: &Image<f32, 1>,
    dx: &mut Image<f32, 1>,
    dy: &mut Image<f32, 1>,
) -> Result<(), ImageError> {
    let (deriv, smooth) = kernels::sobel_kernel_1d();
    separable_filter(src, dx, &deriv, &smooth)?;
    separable_filter(src, dy, &smooth, &deriv)?;
    Ok(())
}
