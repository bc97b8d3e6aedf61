use oblique_3d::{CameraError, HomographyError};
use oblique_image::ImageError;

use crate::pipeline::PairState;

/// An error type for tracking and velocity computation.
#[derive(thiserror::Error, Debug)]
pub enum VelocityError {
    /// Error when too few points survive a stage of the pipeline.
    #[error("Not enough features at the {stage:?} stage, {actual} found but {required} required")]
    InsufficientFeatures {
        /// The stage that produced too few points.
        stage: PairState,
        /// Minimum number of points.
        required: usize,
        /// Number of points left.
        actual: usize,
    },

    /// Error when the arrays of a point set have different lengths.
    #[error("Point sets are not index aligned: {0}")]
    MisalignedPointSets(String),

    /// Error when no homography could be fitted or applied.
    #[error("Homography fit failed")]
    HomographyFitFailure(#[from] HomographyError),

    /// Error when a parameter is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error when an image was requested after being released.
    #[error("Image {0} is not available")]
    ImageUnavailable(usize),

    /// Error from the camera model.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// Error from image processing.
    #[error(transparent)]
    Image(#[from] ImageError),
}
