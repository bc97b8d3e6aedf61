use std::path::Path;

use oblique_imgproc::calibration::{distortion::PolynomialDistortion, CameraIntrinsic};
use serde::{Deserialize, Serialize};

use crate::error::CameraError;

const NUM_RADIAL: usize = 6;
const NUM_TANGENTIAL: usize = 2;

/// Intrinsic calibration of a camera: the camera matrix and lens distortion.
///
/// The matrix is kept in the transposed layout of the calibration files,
/// `[fx 0 0; s fy 0; cx cy 1]`. Use [`IntrinsicModel::camera_matrix_cv`] for the usual
/// `[fx 0 cx; 0 fy cy; 0 0 1]` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicModel {
    matrix: [[f64; 3]; 3],
    radial: [f64; NUM_RADIAL],
    tangential: [f64; NUM_TANGENTIAL],
}

fn pad<const N: usize>(values: &[f64], name: &str) -> Result<[f64; N], CameraError> {
    if values.len() > N {
        return Err(CameraError::InvalidCalibration(format!(
            "expected at most {N} {name} coefficients, got {}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(CameraError::InvalidCalibration(format!(
            "{name} coefficients must be finite"
        )));
    }
    let mut out = [0.0; N];
    out[..values.len()].copy_from_slice(values);
    Ok(out)
}

fn transpose(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    std::array::from_fn(|i| std::array::from_fn(|j| m[j][i]))
}

impl IntrinsicModel {
    /// Create an intrinsic model from raw calibration values.
    ///
    /// The matrix is given in the stored `[fx 0 0; s fy 0; cx cy 1]` layout, see
    /// [`IntrinsicModel::from_opencv_matrix`] for the usual layout. Missing distortion
    /// coefficients are zero.
    ///
    /// # Arguments
    ///
    /// * `matrix` - The 3x3 camera matrix.
    /// * `radial` - Up to six radial coefficients k1..k6.
    /// * `tangential` - Up to two tangential coefficients p1, p2.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidCalibration`] when a focal length is zero or not finite,
    /// when the last column is not `[0 0 1]` or when too many coefficients are given.
    pub fn new(
        matrix: [[f64; 3]; 3],
        radial: &[f64],
        tangential: &[f64],
    ) -> Result<Self, CameraError> {
        if matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidCalibration(
                "camera matrix must be finite".to_string(),
            ));
        }

        if matrix[0][1] != 0.0 || matrix[0][2] != 0.0 || matrix[1][2] != 0.0 {
            return Err(CameraError::InvalidCalibration(format!(
                "camera matrix {matrix:?} is not in the [fx 0 0; s fy 0; cx cy 1] layout, \
                 use IntrinsicModel::from_opencv_matrix for [fx s cx; 0 fy cy; 0 0 1]"
            )));
        }

        if matrix[0][0] == 0.0 || matrix[1][1] == 0.0 {
            return Err(CameraError::InvalidCalibration(
                "focal lengths must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            matrix,
            radial: pad(radial, "radial")?,
            tangential: pad(tangential, "tangential")?,
        })
    }

    /// Create an intrinsic model from a camera matrix in the `[fx s cx; 0 fy cy; 0 0 1]`
    /// layout.
    ///
    /// # Example
    ///
    /// ```
    /// use oblique_3d::camera::IntrinsicModel;
    ///
    /// let cv = [[1000.0, 0.0, 640.0], [0.0, 1000.0, 480.0], [0.0, 0.0, 1.0]];
    /// let model = IntrinsicModel::from_opencv_matrix(cv, &[-0.2], &[]).unwrap();
    ///
    /// assert_eq!(model.principal_point(), (640.0, 480.0));
    /// assert_eq!(model.camera_matrix_cv(), cv);
    /// ```
    pub fn from_opencv_matrix(
        matrix: [[f64; 3]; 3],
        radial: &[f64],
        tangential: &[f64],
    ) -> Result<Self, CameraError> {
        Self::new(transpose(&matrix), radial, tangential)
    }

    /// Parse a calibration text.
    ///
    /// The text holds `RadialDistortion`, `TangentialDistortion` and `IntrinsicMatrix`
    /// sections, each followed by its values, and is closed by `End`. Values are separated by
    /// blanks or commas and may be wrapped in brackets. The matrix is given row by row.
    ///
    /// # Example
    ///
    /// ```
    /// use oblique_3d::camera::IntrinsicModel;
    ///
    /// let text = "RadialDistortion\n[-0.2 0.1]\nTangentialDistortion\n[0 0]\n\
    ///             IntrinsicMatrix\n[1000 0 0]\n[0 1000 0]\n[640 480 1]\nEnd\n";
    /// let model = IntrinsicModel::from_calibration_str(text).unwrap();
    ///
    /// assert_eq!(model.focal_length(), (1000.0, 1000.0));
    /// assert_eq!(model.principal_point(), (640.0, 480.0));
    /// ```
    pub fn from_calibration_str(text: &str) -> Result<Self, CameraError> {
        #[derive(PartialEq)]
        enum Section {
            None,
            Radial,
            Tangential,
            Matrix,
        }

        let mut section = Section::None;
        let mut radial = Vec::new();
        let mut tangential = Vec::new();
        let mut rows: Vec<f64> = Vec::new();

        for (i, line) in text.lines().enumerate() {
            let cleaned = line.replace(['[', ']', ','], " ");
            let cleaned = cleaned.trim();
            if cleaned.is_empty() {
                continue;
            }
            match cleaned.to_lowercase().as_str() {
                "radialdistortion" => {
                    section = Section::Radial;
                    continue;
                }
                "tangentialdistortion" => {
                    section = Section::Tangential;
                    continue;
                }
                "intrinsicmatrix" => {
                    section = Section::Matrix;
                    continue;
                }
                "end" => break,
                _ => {}
            }

            let values = cleaned
                .split_whitespace()
                .map(|v| {
                    v.parse::<f64>().map_err(|e| CameraError::Parse {
                        line: i + 1,
                        message: format!("`{v}`: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            match section {
                Section::Radial => radial.extend(values),
                Section::Tangential => tangential.extend(values),
                Section::Matrix => rows.extend(values),
                Section::None => {
                    return Err(CameraError::Parse {
                        line: i + 1,
                        message: "values outside of a section".to_string(),
                    })
                }
            }
        }

        if rows.len() != 9 {
            return Err(CameraError::InvalidCalibration(format!(
                "intrinsic matrix needs 9 values, got {}",
                rows.len()
            )));
        }
        let matrix = std::array::from_fn(|r| std::array::from_fn(|c| rows[3 * r + c]));

        Self::new(matrix, &radial, &tangential)
    }

    /// Read a calibration file, see [`IntrinsicModel::from_calibration_str`].
    pub fn from_calibration_file(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CameraError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_calibration_str(&text)
    }

    /// Read several calibration files and average them element-wise.
    ///
    /// # Errors
    ///
    /// Returns an error when `paths` is empty or any file fails to load.
    pub fn from_calibration_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, CameraError> {
        let models = paths
            .iter()
            .map(Self::from_calibration_file)
            .collect::<Result<Vec<_>, _>>()?;
        Self::average(&models)
    }

    /// Element-wise average of several calibrations.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidCalibration`] when `models` is empty.
    pub fn average(models: &[Self]) -> Result<Self, CameraError> {
        if models.is_empty() {
            return Err(CameraError::InvalidCalibration(
                "no calibration to average".to_string(),
            ));
        }
        let n = models.len() as f64;

        let mut matrix = [[0.0; 3]; 3];
        let mut radial = [0.0; NUM_RADIAL];
        let mut tangential = [0.0; NUM_TANGENTIAL];
        for m in models {
            for (acc, v) in matrix.iter_mut().flatten().zip(m.matrix.iter().flatten()) {
                *acc += v / n;
            }
            for (acc, v) in radial.iter_mut().zip(m.radial) {
                *acc += v / n;
            }
            for (acc, v) in tangential.iter_mut().zip(m.tangential) {
                *acc += v / n;
            }
        }

        Self::new(matrix, &radial, &tangential)
    }

    /// The camera matrix in the stored `[fx 0 0; s fy 0; cx cy 1]` layout.
    pub fn matrix(&self) -> &[[f64; 3]; 3] {
        &self.matrix
    }

    /// Focal lengths (fx, fy) in pixels.
    pub fn focal_length(&self) -> (f64, f64) {
        (self.matrix[0][0], self.matrix[1][1])
    }

    /// Principal point (cx, cy) in pixels.
    pub fn principal_point(&self) -> (f64, f64) {
        (self.matrix[2][0], self.matrix[2][1])
    }

    /// Skew between the image axes.
    pub fn skew(&self) -> f64 {
        self.matrix[1][0]
    }

    /// Radial coefficients k1..k6.
    pub fn radial(&self) -> &[f64; NUM_RADIAL] {
        &self.radial
    }

    /// Tangential coefficients p1, p2.
    pub fn tangential(&self) -> &[f64; NUM_TANGENTIAL] {
        &self.tangential
    }

    /// The camera matrix as `[fx 0 cx; 0 fy cy; 0 0 1]`, skew dropped.
    pub fn camera_matrix_cv(&self) -> [[f64; 3]; 3] {
        let (fx, fy) = self.focal_length();
        let (cx, cy) = self.principal_point();
        [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]]
    }

    /// Distortion coefficients ordered `k1, k2, p1, p2[, k3[, k4, k5, k6]]`.
    ///
    /// Trailing radial terms are only included when they are used.
    pub fn distortion_coeffs_cv(&self) -> Vec<f64> {
        let [k1, k2, k3, k4, k5, k6] = self.radial;
        let [p1, p2] = self.tangential;
        let mut coeffs = vec![k1, k2, p1, p2];
        if k4 != 0.0 {
            coeffs.extend([k3, k4, k5, k6]);
        } else if k3 != 0.0 {
            coeffs.push(k3);
        }
        coeffs
    }

    /// The pinhole part of the model.
    pub fn intrinsic(&self) -> CameraIntrinsic {
        let (fx, fy) = self.focal_length();
        let (cx, cy) = self.principal_point();
        CameraIntrinsic { fx, fy, cx, cy }
    }

    /// The lens distortion part of the model.
    pub fn distortion(&self) -> PolynomialDistortion {
        let [k1, k2, k3, k4, k5, k6] = self.radial;
        let [p1, p2] = self.tangential;
        PolynomialDistortion {
            k1,
            k2,
            k3,
            k4,
            k5,
            k6,
            p1,
            p2,
        }
    }
}
