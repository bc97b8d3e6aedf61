//! Pixel interpolation methods for sub-pixel image sampling.
//!
//! - **Bilinear**: linear interpolation between the four adjacent pixels, used by the
//!   pyramidal optical flow.
//! - **Bicubic spline**: natural cubic spline surface through every pixel, used to locate
//!   correlation peaks between pixels.

mod bilinear;
mod spline;

pub use bilinear::bilinear_interpolation;
pub use spline::BicubicSpline;
