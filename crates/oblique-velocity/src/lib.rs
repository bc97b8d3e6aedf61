#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Lens distortion correction of tracked points.
pub mod correction;

/// Error types for the velocity module.
pub mod error;

/// Homography estimation between image pairs.
pub mod homography;

/// Per pair velocity computation over image sequences.
pub mod pipeline;

/// Tracked point sets.
pub mod points;

/// Image and mask providers.
pub mod provider;

/// Point seeding and tracking.
pub mod tracker;

pub use crate::error::VelocityError;
