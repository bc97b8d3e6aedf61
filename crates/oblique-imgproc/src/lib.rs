#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// camera intrinsics and lens distortion module.
pub mod calibration;

/// image cropping module.
pub mod crop;

/// utilities to rasterize polygons into masks.
pub mod draw;

/// feature detection module.
pub mod features;

/// image filtering module.
pub mod filter;

/// utilities for interpolation.
pub mod interpolation;

/// sparse optical flow module.
pub mod optical_flow;

/// Pyramid operations
pub mod pyramid;

/// template matching module.
pub mod template;
