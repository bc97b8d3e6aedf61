use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a camera in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Camera centre as (x, y, z).
    pub location: [f64; 3],
    /// View direction as (yaw, pitch, roll) in radians.
    pub yaw_pitch_roll: [f64; 3],
}

impl CameraPose {
    /// Create a pose from a location and (yaw, pitch, roll) in radians.
    pub fn new(location: [f64; 3], yaw_pitch_roll: [f64; 3]) -> Self {
        Self {
            location,
            yaw_pitch_roll,
        }
    }

    /// Create a pose from a location and (yaw, pitch, roll) in degrees.
    pub fn from_degrees(location: [f64; 3], yaw_pitch_roll: [f64; 3]) -> Self {
        Self::new(location, yaw_pitch_roll.map(f64::to_radians))
    }

    /// The world to camera rotation of the pose.
    pub fn rotation(&self) -> DMat3 {
        rotation_from_ypr(self.yaw_pitch_roll)
    }

    /// Transform a world point into the camera frame.
    pub fn world_to_camera(&self, point: [f64; 3]) -> DVec3 {
        self.rotation() * (DVec3::from(point) - DVec3::from(self.location))
    }
}

/// Compute the world to camera rotation matrix from (yaw, pitch, roll) in radians.
///
/// The camera looks along the third row of the matrix. Yaw is measured counter clockwise
/// from the x axis, a positive pitch tilts the view down and roll turns the image about
/// the optical axis.
///
/// # Example
///
/// ```
/// use oblique_3d::camera::rotation_from_ypr;
///
/// let rot = rotation_from_ypr([0.0, std::f64::consts::FRAC_PI_2, 0.0]);
/// let axis = rot.row(2);
///
/// assert!((axis.z + 1.0).abs() < 1e-12);
/// ```
pub fn rotation_from_ypr(yaw_pitch_roll: [f64; 3]) -> DMat3 {
    let [c0, c1, c2] = yaw_pitch_roll.map(f64::cos);
    let [s0, s1, s2] = yaw_pitch_roll.map(f64::sin);

    let p = DVec3::new(s2 * s1 * c0 - c2 * s0, s2 * s1 * s0 + c2 * c0, s2 * c1);
    let q = DVec3::new(c2 * s1 * c0 + s2 * s0, c2 * s1 * s0 - s2 * c0, c2 * c1);
    let r = DVec3::new(c1 * c0, c1 * s0, -s1);

    // glam is column major, the rows are -p, -q and r
    DMat3::from_cols(-p, -q, r).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_rotation_is_orthonormal() {
        for ypr in [
            [0.0, 0.0, 0.0],
            [0.3, -0.2, 0.1],
            [2.5, 1.2, -0.7],
            [-1.0, FRAC_PI_2, 3.0],
        ] {
            let rot = rotation_from_ypr(ypr);
            let eye = rot * rot.transpose();
            for (a, b) in eye
                .to_cols_array()
                .iter()
                .zip(DMat3::IDENTITY.to_cols_array().iter())
            {
                assert_relative_eq!(*a, *b, epsilon = 1e-12);
            }
            assert_relative_eq!(rot.determinant().abs(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_zero_pose_looks_along_x() {
        let rot = rotation_from_ypr([0.0, 0.0, 0.0]);
        let axis = rot.row(2);
        assert_relative_eq!(axis.x, 1.0);
        assert_relative_eq!(axis.y, 0.0);
        assert_relative_eq!(axis.z, 0.0);

        // image rows grow downwards
        let cam = CameraPose::new([0.0; 3], [0.0; 3]).world_to_camera([10.0, 0.0, -1.0]);
        assert!(cam.y > 0.0);
    }

    #[test]
    fn test_positive_pitch_looks_down() {
        let pose = CameraPose::from_degrees([0.0, 0.0, 100.0], [0.0, 90.0, 0.0]);
        let cam = pose.world_to_camera([0.0, 0.0, 0.0]);
        assert_relative_eq!(cam.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(cam.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(cam.z, 100.0, epsilon = 1e-9);

        let up = CameraPose::from_degrees([0.0, 0.0, 100.0], [0.0, -90.0, 0.0]);
        assert!(up.world_to_camera([0.0, 0.0, 0.0]).z < 0.0);
    }
}
