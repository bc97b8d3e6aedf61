use std::sync::{Arc, OnceLock};

use glam::{DMat3, DVec3};
use oblique_image::ImageSize;
use oblique_imgproc::calibration::distortion::distort_normalized;
use rayon::prelude::*;

use super::{CameraPose, IntrinsicModel};
use crate::config::CamEnvConfig;
use crate::dem::{Dem, DemAxis, RasterDem};
use crate::error::CameraError;
use crate::triangulation::LinearInterpolator;

// saturation of the squared normalized radius in the distortion polynomial
const MAX_DISTORTION_R2: f64 = 4.0;

/// Whether [`CameraModel::project`] applies the lens distortion model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectionDistortion {
    /// Ideal pinhole projection.
    #[default]
    Disabled,
    /// Apply the radial and tangential distortion of the intrinsic model.
    Enabled,
}

/// The result of projecting world points into the image, index aligned with the input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    /// Pixel coordinates (u, v), NaN for points behind the camera.
    pub uv: Vec<[f64; 2]>,
    /// Distance along the optical axis.
    pub depth: Vec<f64>,
    /// Whether the point is in front of the camera and inside the image.
    pub in_frame: Vec<bool>,
}

/// Correspondences between visible DEM cells and their pixels, with the interpolator used
/// to map pixels back to the terrain.
pub struct InverseProjectionGrid {
    xyz: Vec<[f64; 3]>,
    uv: Vec<[f64; 2]>,
    interpolator: LinearInterpolator<3>,
}

impl InverseProjectionGrid {
    /// World coordinates of the visible in-frame DEM cells.
    pub fn world_points(&self) -> &[[f64; 3]] {
        &self.xyz
    }

    /// Pixel coordinates of the visible in-frame DEM cells.
    pub fn image_points(&self) -> &[[f64; 2]] {
        &self.uv
    }

    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.xyz.len()
    }

    /// Whether the grid holds no correspondence.
    pub fn is_empty(&self) -> bool {
        self.xyz.is_empty()
    }

    /// Interpolate the world coordinates of pixels, NaN outside the grid hull.
    pub fn interpolate(&self, uv: &[[f64; 2]]) -> Vec<[f64; 3]> {
        self.interpolator.interpolate_many(uv)
    }
}

/// A calibrated camera at a known pose above a DEM.
///
/// Projects world points into the image and maps pixels back onto the terrain. The
/// inverse projection grid is built on first use and cached until the pose or the DEM
/// change.
pub struct CameraModel {
    intrinsics: IntrinsicModel,
    pose: CameraPose,
    image_size: ImageSize,
    dem: Arc<dyn Dem>,
    distortion: ProjectionDistortion,
    grid: OnceLock<InverseProjectionGrid>,
}

impl CameraModel {
    /// Create a camera model.
    ///
    /// # Arguments
    ///
    /// * `intrinsics` - The intrinsic calibration.
    /// * `pose` - The camera location and orientation.
    /// * `image_size` - Size of the images taken by the camera.
    /// * `dem` - The terrain seen by the camera.
    pub fn new(
        intrinsics: IntrinsicModel,
        pose: CameraPose,
        image_size: ImageSize,
        dem: Arc<dyn Dem>,
    ) -> Self {
        Self {
            intrinsics,
            pose,
            image_size,
            dem,
            distortion: ProjectionDistortion::default(),
            grid: OnceLock::new(),
        }
    }

    /// Create a camera model from a camera environment configuration.
    ///
    /// Calibration files listed in the configuration are loaded and averaged, and the DEM is
    /// densified by the configured factor.
    ///
    /// # Arguments
    ///
    /// * `config` - The parsed camera environment.
    /// * `dem` - The DEM read from `config.dem_path`.
    /// * `image_size` - Size of the image read from `config.image_path`.
    pub fn from_config(
        config: &CamEnvConfig,
        dem: &RasterDem,
        image_size: ImageSize,
    ) -> Result<Self, CameraError> {
        let intrinsics = IntrinsicModel::from_calibration_files(&config.calibration_paths)?;
        let pose = CameraPose::new(config.camera_location, config.yaw_pitch_roll);
        let dem = dem.densify(config.dem_densification)?;
        log::info!(
            "camera environment '{}' loaded, DEM {}x{}",
            config.name,
            dem.shape().0,
            dem.shape().1
        );
        Ok(Self::new(intrinsics, pose, image_size, Arc::new(dem)))
    }

    /// Select whether [`CameraModel::project`] applies lens distortion.
    pub fn with_projection_distortion(mut self, distortion: ProjectionDistortion) -> Self {
        self.distortion = distortion;
        self.grid = OnceLock::new();
        self
    }

    /// The intrinsic calibration.
    pub fn intrinsics(&self) -> &IntrinsicModel {
        &self.intrinsics
    }

    /// The camera pose.
    pub fn pose(&self) -> &CameraPose {
        &self.pose
    }

    /// The image size.
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    /// The DEM.
    pub fn dem(&self) -> &Arc<dyn Dem> {
        &self.dem
    }

    /// The world to camera rotation.
    pub fn rotation(&self) -> DMat3 {
        self.pose.rotation()
    }

    /// Replace the pose and drop the cached inverse projection grid.
    pub fn set_pose(&mut self, pose: CameraPose) {
        self.pose = pose;
        self.grid = OnceLock::new();
    }

    /// Replace the DEM and drop the cached inverse projection grid.
    pub fn set_dem(&mut self, dem: Arc<dyn Dem>) {
        self.dem = dem;
        self.grid = OnceLock::new();
    }

    /// Project world points into the image.
    ///
    /// # Arguments
    ///
    /// * `xyz` - World points as (x, y, z).
    ///
    /// # Returns
    ///
    /// Pixel coordinates, depth and in-frame flags for every point.
    pub fn project(&self, xyz: &[[f64; 3]]) -> Projection {
        let rot = self.rotation();
        let loc = DVec3::from(self.pose.location);
        let (fx, fy) = self.intrinsics.focal_length();
        let (cx, cy) = self.intrinsics.principal_point();
        let dist = self.intrinsics.distortion();
        let apply_distortion = self.distortion == ProjectionDistortion::Enabled;
        let (width, height) = (
            self.image_size.width as f64,
            self.image_size.height as f64,
        );

        let projected = xyz
            .par_iter()
            .map(|&p| {
                let cam = rot * (DVec3::from(p) - loc);
                let depth = cam.z;
                if depth <= 0.0 {
                    return ([f64::NAN; 2], depth, false);
                }

                let (mut x, mut y) = (cam.x / depth, cam.y / depth);
                if apply_distortion {
                    (x, y) = distort_normalized(x, y, &dist, MAX_DISTORTION_R2);
                }
                let (u, v) = (fx * x + cx, fy * y + cy);
                let in_frame = (1.0..=width).contains(&u) && (1.0..=height).contains(&v);
                ([u, v], depth, in_frame)
            })
            .collect::<Vec<_>>();

        let mut out = Projection {
            uv: Vec::with_capacity(xyz.len()),
            depth: Vec::with_capacity(xyz.len()),
            in_frame: Vec::with_capacity(xyz.len()),
        };
        for (uv, depth, in_frame) in projected {
            out.uv.push(uv);
            out.depth.push(depth);
            out.in_frame.push(in_frame);
        }
        out
    }

    /// Project world points given as a flat `[x0, y0, z0, x1, ...]` buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidInput`] when the length is not a multiple of 3.
    pub fn project_flat(&self, xyz: &[f64]) -> Result<Projection, CameraError> {
        if xyz.len() % 3 != 0 {
            return Err(CameraError::InvalidInput(format!(
                "world points buffer of length {} is not a multiple of 3",
                xyz.len()
            )));
        }
        let points = xyz
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect::<Vec<_>>();
        Ok(self.project(&points))
    }

    /// The inverse projection grid, built on first call.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::EmptyProjectionGrid`] when no DEM cell is visible inside the
    /// image.
    pub fn inverse_projection_grid(&self) -> Result<&InverseProjectionGrid, CameraError> {
        if let Some(grid) = self.grid.get() {
            return Ok(grid);
        }
        let grid = self.build_grid()?;
        Ok(self.grid.get_or_init(|| grid))
    }

    fn build_grid(&self) -> Result<InverseProjectionGrid, CameraError> {
        let dem = &self.dem;
        let visible = dem.visibility(self.pose.location);
        let (x, y, z) = (
            dem.data(DemAxis::X),
            dem.data(DemAxis::Y),
            dem.data(DemAxis::Z),
        );

        let cells = (0..z.len())
            .filter(|&i| visible[i] && z[i].is_finite())
            .map(|i| [x[i], y[i], z[i]])
            .collect::<Vec<_>>();
        let projection = self.project(&cells);

        let (xyz, uv): (Vec<_>, Vec<_>) = cells
            .into_iter()
            .zip(projection.uv)
            .zip(projection.in_frame)
            .filter_map(|((p, uv), in_frame)| in_frame.then_some((p, uv)))
            .unzip();

        if xyz.is_empty() {
            return Err(CameraError::EmptyProjectionGrid);
        }
        log::info!(
            "inverse projection grid built from {} of {} DEM cells",
            xyz.len(),
            z.len()
        );

        let interpolator = LinearInterpolator::new(&uv, xyz.clone());
        Ok(InverseProjectionGrid {
            xyz,
            uv,
            interpolator,
        })
    }

    /// Map pixels back onto the DEM.
    ///
    /// Each pixel is interpolated linearly between the pixels of the visible DEM cells.
    /// Pixels outside the area covered by the DEM map to NaN.
    ///
    /// # Arguments
    ///
    /// * `uv` - Pixel coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::EmptyProjectionGrid`] when no DEM cell is visible inside the
    /// image.
    pub fn invproject(&self, uv: &[[f64; 2]]) -> Result<Vec<[f64; 3]>, CameraError> {
        Ok(self.inverse_projection_grid()?.interpolate(uv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nadir_camera() -> Result<CameraModel, CameraError> {
        let intrinsics = IntrinsicModel::new(
            [[100.0, 0.0, 0.0], [0.0, 100.0, 0.0], [100.0, 75.0, 1.0]],
            &[],
            &[],
        )?;
        let pose = CameraPose::from_degrees([0.0, 0.0, 100.0], [0.0, 90.0, 0.0]);
        let axis = (0..61).map(|i| -150.0 + 5.0 * i as f64).collect::<Vec<_>>();
        let dem = RasterDem::from_fn(axis.clone(), axis, |_, _| 0.0)?;
        Ok(CameraModel::new(
            intrinsics,
            pose,
            ImageSize {
                width: 200,
                height: 150,
            },
            Arc::new(dem),
        ))
    }

    #[test]
    fn test_project_principal_point() -> Result<(), CameraError> {
        let camera = nadir_camera()?;
        let proj = camera.project(&[[0.0, 0.0, 0.0], [0.0, 0.0, 200.0], [500.0, 0.0, 0.0]]);

        assert_relative_eq!(proj.uv[0][0], 100.0, epsilon = 1e-9);
        assert_relative_eq!(proj.uv[0][1], 75.0, epsilon = 1e-9);
        assert_relative_eq!(proj.depth[0], 100.0, epsilon = 1e-9);
        assert!(proj.in_frame[0]);

        // above the camera
        assert!(proj.uv[1][0].is_nan() && proj.uv[1][1].is_nan());
        assert!(!proj.in_frame[1]);

        // in front but outside the image
        assert!(proj.uv[2][0].is_finite());
        assert!(!proj.in_frame[2]);
        Ok(())
    }

    #[test]
    fn test_project_looking_up_is_behind() -> Result<(), CameraError> {
        let mut camera = nadir_camera()?;
        camera.set_pose(CameraPose::from_degrees([0.0, 0.0, 100.0], [0.0, -90.0, 0.0]));
        let proj = camera.project(&[[0.0, 0.0, 0.0]]);
        assert!(proj.uv[0][0].is_nan());
        assert!(!proj.in_frame[0]);
        Ok(())
    }

    #[test]
    fn test_project_flat() -> Result<(), CameraError> {
        let camera = nadir_camera()?;
        let proj = camera.project_flat(&[0.0, 0.0, 0.0, 10.0, 0.0, 0.0])?;
        assert_eq!(proj.uv.len(), 2);
        assert!(matches!(
            camera.project_flat(&[0.0, 1.0]),
            Err(CameraError::InvalidInput(_))
        ));
        Ok(())
    }

    #[test]
    fn test_projection_distortion() -> Result<(), CameraError> {
        let intrinsics = IntrinsicModel::new(
            [[100.0, 0.0, 0.0], [0.0, 100.0, 0.0], [100.0, 75.0, 1.0]],
            &[-0.2],
            &[],
        )?;
        let camera = CameraModel::new(
            intrinsics,
            *nadir_camera()?.pose(),
            ImageSize {
                width: 200,
                height: 150,
            },
            nadir_camera()?.dem().clone(),
        );
        let point = [[0.0, -50.0, 0.0]];
        let ideal = camera.project(&point);
        let distorted = camera
            .with_projection_distortion(ProjectionDistortion::Enabled)
            .project(&point);

        // barrel distortion pulls the point towards the principal point
        let r_ideal = (ideal.uv[0][0] - 100.0).hypot(ideal.uv[0][1] - 75.0);
        let r_dist = (distorted.uv[0][0] - 100.0).hypot(distorted.uv[0][1] - 75.0);
        assert_relative_eq!(r_ideal, 50.0, epsilon = 1e-9);
        assert_relative_eq!(r_dist, 50.0 * (1.0 - 0.2 * 0.25), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_invproject_round_trip() -> Result<(), CameraError> {
        let camera = nadir_camera()?;
        let world = [[10.0, 20.0, 0.0], [-42.5, 13.0, 0.0], [60.0, -30.0, 0.0]];
        let proj = camera.project(&world);
        assert!(proj.in_frame.iter().all(|&f| f));

        let back = camera.invproject(&proj.uv)?;
        for (b, w) in back.iter().zip(world.iter()) {
            for k in 0..3 {
                assert_relative_eq!(b[k], w[k], epsilon = 1e-6);
            }
        }

        let grid = camera.inverse_projection_grid()?;
        assert!(!grid.is_empty());
        assert_eq!(grid.world_points().len(), grid.image_points().len());

        // far outside the image footprint
        let outside = camera.invproject(&[[-500.0, -500.0]])?;
        assert!(outside[0].iter().all(|v| v.is_nan()));
        Ok(())
    }

    #[test]
    fn test_grid_is_rebuilt_after_pose_change() -> Result<(), CameraError> {
        let mut camera = nadir_camera()?;
        let before = camera.inverse_projection_grid()?.len();

        camera.set_pose(CameraPose::from_degrees([0.0, 0.0, 50.0], [0.0, 90.0, 0.0]));
        let after = camera.inverse_projection_grid()?.len();
        assert!(after < before);

        camera.set_pose(CameraPose::from_degrees([0.0, 0.0, 100.0], [0.0, -90.0, 0.0]));
        assert!(matches!(
            camera.invproject(&[[100.0, 75.0]]),
            Err(CameraError::EmptyProjectionGrid)
        ));
        Ok(())
    }
}
