use std::path::PathBuf;

/// An error type for camera and DEM operations.
#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    /// Error when the calibration values are not usable.
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Error when an input buffer has the wrong shape.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error when the DEM grids are inconsistent.
    #[error("Invalid DEM: {0}")]
    InvalidDem(String),

    /// Error when a required keyword is missing from a configuration file.
    #[error("Missing keyword `{0}` in camera environment file")]
    MissingKey(&'static str),

    /// Error when a value in a text file cannot be parsed.
    #[error("Failed to parse line {line}: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Error when no DEM cell is visible and inside the image.
    #[error("No DEM cell is visible inside the image frame")]
    EmptyProjectionGrid,

    /// Error when reading a file.
    #[error("Failed to read {path}")]
    Io {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// An error type for homography estimation.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum HomographyError {
    /// Error when too few correspondences are given.
    #[error("At least {required} correspondences are needed, got {actual}")]
    InsufficientPoints {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences given.
        actual: usize,
    },

    /// Error when the point sets have different lengths.
    #[error("Source has {src} points but destination has {dst}")]
    MismatchedLengths {
        /// Number of source points.
        src: usize,
        /// Number of destination points.
        dst: usize,
    },

    /// Error when no model could be fitted to the correspondences.
    #[error("Degenerate configuration, no homography could be fitted")]
    Degenerate,

    /// Error when the homography cannot be inverted.
    #[error("Homography matrix is singular")]
    Singular,
}
