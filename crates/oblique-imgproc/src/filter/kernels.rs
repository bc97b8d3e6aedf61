/// Create a box blur kernel.
///
/// # Arguments
///
/// * `kernel_size` - The size of the kernel.
///
/// # Returns
///
/// A vector of the kernel.
pub fn box_blur_kernel_1d(kernel_size: usize) -> Vec<f32> {
    vec![1.0 / kernel_size as f32; kernel_size]
}

/// Create the 3x3 sobel derivative and smoothing kernels.
///
/// # Returns
///
/// The derivative kernel and the smoothing kernel, normalized so that a unit ramp gives
/// a unit response.
pub fn sobel_kernel_1d() -> (Vec<f32>, Vec<f32>) {
    (vec![-0.5, 0.0, 0.5], vec![0.25, 0.5, 0.25])
}

/// Create the 5 tap binomial kernel used to build gaussian pyramids.
pub fn pyramid_kernel_1d() -> Vec<f32> {
    [1.0, 4.0, 6.0, 4.0, 1.0].iter().map(|&x| x / 16.0).collect()
}
