#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera pose, intrinsics and the projection model.
pub mod camera;

/// Camera environment configuration files.
pub mod config;

/// Digital elevation models.
pub mod dem;

/// Error types for the 3d module.
pub mod error;

/// Ground control points.
pub mod gcp;

/// Planar homography estimation.
pub mod homography;

/// Linear algebra utilities.
pub mod linalg;

/// Delaunay triangulation and piecewise linear interpolation.
pub mod triangulation;

/// Line of sight visibility over a DEM.
pub mod viewshed;

pub use crate::error::{CameraError, HomographyError};
