use oblique_3d::camera::IntrinsicModel;
use oblique_image::ImageSize;
use oblique_imgproc::calibration::distortion::{
    optimal_new_camera_matrix, undistort_points, PolynomialDistortion,
};
use oblique_imgproc::calibration::CameraIntrinsic;

use crate::error::VelocityError;
use crate::points::TrackedPointSet;

/// Removes lens distortion from tracked pixel positions.
///
/// Points are mapped into the pinhole camera given by the optimal new camera matrix with
/// every source pixel kept (`alpha = 1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionCorrection {
    intrinsic: CameraIntrinsic,
    distortion: PolynomialDistortion,
    new_intrinsic: CameraIntrinsic,
}

impl DistortionCorrection {
    /// Create the correction for a camera, `None` when the lens has no distortion.
    ///
    /// # Arguments
    ///
    /// * `intrinsics` - The camera calibration.
    /// * `size` - The size of the images the points were tracked in.
    pub fn new(intrinsics: &IntrinsicModel, size: ImageSize) -> Option<Self> {
        let distortion = intrinsics.distortion();
        if distortion.is_identity() {
            return None;
        }
        let intrinsic = intrinsics.intrinsic();
        let new_intrinsic = optimal_new_camera_matrix(&intrinsic, &distortion, size, 1.0);
        log::debug!("undistorted camera matrix {new_intrinsic:?}");
        Some(Self {
            intrinsic,
            distortion,
            new_intrinsic,
        })
    }

    /// The pinhole camera of the corrected points.
    pub fn new_intrinsic(&self) -> &CameraIntrinsic {
        &self.new_intrinsic
    }

    /// Undistort pixel positions.
    pub fn points(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        undistort_points(points, &self.intrinsic, &self.distortion, &self.new_intrinsic)
    }

    /// Map corrected pixel positions into the camera matrix of the calibration.
    ///
    /// The camera model projects through the calibrated pinhole, so corrected points are
    /// moved from the new camera matrix into it before they are projected onto the DEM.
    pub fn to_camera(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        points
            .iter()
            .map(|p| {
                let (x, y) = self.new_intrinsic.normalize(p[0], p[1]);
                let (u, v) = self.intrinsic.denormalize(x, y);
                [u, v]
            })
            .collect()
    }

    /// Undistort every position of a tracked point set, keeping its errors.
    pub fn apply(&self, set: TrackedPointSet) -> Result<TrackedPointSet, VelocityError> {
        let seeds = self.points(set.seeds());
        let tracked = self.points(set.tracked());
        let backtracked = set.backtracked().map(|b| self.points(b));
        set.with_points(seeds, tracked, backtracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::TrackingErrorKind;
    use approx::assert_abs_diff_eq;
    use oblique_imgproc::calibration::distortion::distort_point_polynomial;

    const SIZE: ImageSize = ImageSize {
        width: 640,
        height: 480,
    };

    fn intrinsics(radial: &[f64]) -> Result<IntrinsicModel, VelocityError> {
        Ok(IntrinsicModel::new(
            [[800.0, 0.0, 0.0], [0.0, 800.0, 0.0], [320.0, 240.0, 1.0]],
            radial,
            &[],
        )?)
    }

    #[test]
    fn test_no_distortion() -> Result<(), VelocityError> {
        assert!(DistortionCorrection::new(&intrinsics(&[])?, SIZE).is_none());
        Ok(())
    }

    #[test]
    fn test_undistort_set() -> Result<(), VelocityError> {
        let model = intrinsics(&[-0.2, 0.05])?;
        let correction = DistortionCorrection::new(&model, SIZE).expect("lens is distorted");

        // distorted observations of two ideal pixels
        let ideal = [[100.0, 80.0], [500.0, 400.0]];
        let observed = ideal
            .iter()
            .map(|p| {
                let (u, v) = distort_point_polynomial(
                    p[0],
                    p[1],
                    &model.intrinsic(),
                    &model.distortion(),
                );
                [u, v]
            })
            .collect::<Vec<_>>();

        let set = TrackedPointSet::new(
            observed.clone(),
            observed.clone(),
            Some(observed),
            vec![0.1, 0.2],
            TrackingErrorKind::Backtrack,
        )?;
        let corrected = correction.apply(set)?;
        assert_eq!(corrected.errors(), &[0.1, 0.2]);

        let k = model.intrinsic();
        let n = correction.new_intrinsic();
        for (p, c) in ideal.iter().zip(corrected.seeds()) {
            let (x, y) = k.normalize(p[0], p[1]);
            let (u, v) = n.denormalize(x, y);
            assert_abs_diff_eq!(c[0], u, epsilon = 1e-6);
            assert_abs_diff_eq!(c[1], v, epsilon = 1e-6);
        }
        assert_eq!(corrected.seeds(), corrected.tracked());
        Ok(())
    }

    #[test]
    fn test_to_camera_removes_distortion() -> Result<(), VelocityError> {
        let model = intrinsics(&[-0.2])?;
        let correction = DistortionCorrection::new(&model, SIZE).expect("lens is distorted");
        assert!(correction.new_intrinsic().fx != model.intrinsic().fx);

        let ideal = [[320.0, 240.0], [40.0, 30.0], [600.0, 120.0]];
        let observed = ideal
            .iter()
            .map(|p| {
                let (u, v) = distort_point_polynomial(
                    p[0],
                    p[1],
                    &model.intrinsic(),
                    &model.distortion(),
                );
                [u, v]
            })
            .collect::<Vec<_>>();

        let back = correction.to_camera(&correction.points(&observed));
        for (p, b) in ideal.iter().zip(&back) {
            assert_abs_diff_eq!(b[0], p[0], epsilon = 1e-6);
            assert_abs_diff_eq!(b[1], p[1], epsilon = 1e-6);
        }
        Ok(())
    }
}
