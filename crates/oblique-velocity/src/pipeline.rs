//! Velocities of points tracked between consecutive images of a sequence.
//!
//! Each image pair goes through the stages of [`PairState`]: seeding, tracking, lens
//! distortion correction, an optional homography correction for camera motion and the
//! projection of the pixel positions onto the DEM. A pair with too few points is skipped
//! and the sequence carries on with the next one.

use oblique_3d::camera::CameraModel;
use oblique_3d::homography::{apply_homography, HomographyMethod, RansacParams};
use oblique_image::{Image, ImageSize};
use oblique_imgproc::features::CornerParams;
use serde::{Deserialize, Serialize};

use crate::correction::DistortionCorrection;
use crate::error::VelocityError;
use crate::homography::{estimate_homography, HomographyResult};
use crate::points::{select, TrackedPointSet};
use crate::provider::{ImageProvider, MaskProvider};
use crate::tracker::{
    seed_dense, seed_sparse, template_match, track, TemplateParams, TrackParams,
};

/// Points whose homography corrected displacement is not larger than this many times the
/// homography standard error are treated as static.
pub const DISPLACEMENT_TOLERANCE: f64 = 2.0;

/// The stages an image pair goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairState {
    /// Points are seeded in the first image.
    Seed,
    /// Points are tracked into the second image.
    Track,
    /// Lens distortion is removed from the tracked points.
    Undistort,
    /// A homography is fitted to the tracked points.
    Fit,
    /// Camera motion is removed with a homography.
    HomographyCorrect,
    /// Pixel positions are projected onto the DEM.
    Project,
    /// Displacements are computed.
    Velocity,
}

fn enter(state: PairState) {
    log::debug!("entering {state:?}");
}

/// How points are tracked over a dense grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DenseTracking {
    /// Pyramidal Lucas-Kanade with back-tracking.
    OpticalFlow(TrackParams),
    /// Template matching.
    Template(TemplateParams),
}

/// How points are seeded and tracked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VelocityMethod {
    /// Corners seeded in the first image and tracked with optical flow.
    Sparse {
        /// The corner detector parameters.
        corners: CornerParams,
        /// The tracking parameters, `min_features` also applies to seeding.
        tracking: TrackParams,
    },
    /// A regular grid seeded over the DEM.
    Dense {
        /// Node spacing along x and y in world units.
        grid_spacing: [f64; 2],
        /// How the grid is tracked.
        tracking: DenseTracking,
    },
}

impl Default for VelocityMethod {
    fn default() -> Self {
        Self::Sparse {
            corners: CornerParams::default(),
            tracking: TrackParams::default(),
        }
    }
}

/// Parameters of a [`VelocityPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityParams {
    /// How points are seeded and tracked.
    pub method: VelocityMethod,
    /// Whether to remove lens distortion from the tracked points.
    pub correct_distortion: bool,
}

impl Default for VelocityParams {
    fn default() -> Self {
        Self {
            method: VelocityMethod::default(),
            correct_distortion: true,
        }
    }
}

/// Parameters of a [`HomographyPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomographyParams {
    /// The corner detector parameters.
    pub corners: CornerParams,
    /// The tracking parameters, `min_features` also applies to seeding.
    pub tracking: TrackParams,
    /// The robust estimator.
    pub method: HomographyMethod,
    /// The sampling parameters of the robust estimators.
    pub ransac: RansacParams,
    /// Whether to remove lens distortion from the tracked points before fitting.
    pub correct_distortion: bool,
}

impl Default for HomographyParams {
    fn default() -> Self {
        Self {
            corners: CornerParams::default(),
            tracking: TrackParams::default(),
            method: HomographyMethod::default(),
            ransac: RansacParams::default(),
            correct_distortion: true,
        }
    }
}

/// The displacement of one tracked point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityRecord {
    /// Horizontal distance between the start and end world positions.
    pub world_velocity: f64,
    /// World position in the first image.
    pub world_start: [f64; 3],
    /// World position in the second image.
    pub world_end: [f64; 3],
    /// Horizontal distance between the start and back-tracked world positions.
    ///
    /// `None` when the point was not tracked back.
    pub world_error: Option<f64>,
    /// Pixel distance between the start and the (corrected) end position.
    pub pixel_velocity: f64,
    /// Pixel position in the first image.
    pub pixel_start: [f64; 2],
    /// Pixel position in the second image.
    pub pixel_end: [f64; 2],
    /// Pixel position in the second image with the camera motion removed, if corrected.
    pub pixel_corrected: Option<[f64; 2]>,
    /// Tracking error of the point, see [`crate::points::TrackingErrorKind`].
    pub pixel_error: f64,
}

/// How the processing of an image pair ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PairOutcome {
    /// Velocities were computed.
    Success(Vec<VelocityRecord>),
    /// The pair was skipped.
    Skipped {
        /// Why the pair was skipped.
        reason: String,
    },
}

/// The velocities between two consecutive images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairVelocities {
    /// Name of the first image.
    pub first: String,
    /// Name of the second image.
    pub second: String,
    /// The result of the pair.
    pub outcome: PairOutcome,
}

impl PairVelocities {
    /// The records of the pair, empty when it was skipped.
    pub fn records(&self) -> &[VelocityRecord] {
        match &self.outcome {
            PairOutcome::Success(records) => records,
            PairOutcome::Skipped { .. } => &[],
        }
    }

    /// Whether velocities were computed.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PairOutcome::Success(_))
    }
}

// run `f` over consecutive image pairs holding at most two images at a time
fn for_each_pair<T>(
    provider: &mut dyn ImageProvider,
    mut f: impl FnMut(usize, &Image<f32, 1>, &Image<f32, 1>) -> T,
) -> Result<Vec<T>, VelocityError> {
    let n = provider.len();
    if n < 2 {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(n - 1);
    let mut prev = provider.image(0)?;
    for i in 0..n - 1 {
        let next = provider.image(i + 1)?;
        provider.release(i);
        log::info!(
            "processing images {} and {}",
            provider.name(i),
            provider.name(i + 1)
        );
        out.push(f(i, &prev, &next));
        prev = next;
    }
    provider.release(n - 1);
    Ok(out)
}

fn image_mask(
    mask: Option<&dyn MaskProvider>,
    size: ImageSize,
) -> Result<Option<Image<u8, 1>>, VelocityError> {
    mask.map(|m| m.mask(size)).transpose()
}

fn undistort(
    camera: &CameraModel,
    enabled: bool,
    set: TrackedPointSet,
    size: ImageSize,
) -> Result<(TrackedPointSet, Option<DistortionCorrection>), VelocityError> {
    enter(PairState::Undistort);
    match DistortionCorrection::new(camera.intrinsics(), size).filter(|_| enabled) {
        Some(correction) => Ok((correction.apply(set)?, Some(correction))),
        None => Ok((set, None)),
    }
}

/// Remove the camera motion described by `homography` from the tracked points.
///
/// The tracked points are mapped back with the inverse homography. Points whose corrected
/// displacement does not exceed [`DISPLACEMENT_TOLERANCE`] times the homography standard
/// error are dropped.
///
/// # Returns
///
/// The surviving points and their corrected positions in the second image.
///
/// # Errors
///
/// Returns [`VelocityError::HomographyFitFailure`] when the homography is singular.
pub fn correct_homography(
    set: &TrackedPointSet,
    homography: &HomographyResult,
) -> Result<(TrackedPointSet, Vec<[f64; 2]>), VelocityError> {
    enter(PairState::HomographyCorrect);
    let corrected = apply_homography(set.tracked(), &homography.matrix, true)?;
    let threshold = homography.stats.std_error() * DISPLACEMENT_TOLERANCE;

    let keep = set
        .seeds()
        .iter()
        .zip(&corrected)
        .map(|(s, c)| (c[0] - s[0]).hypot(c[1] - s[1]) > threshold)
        .collect::<Vec<_>>();
    let kept = set.retain(&keep)?;
    log::info!(
        "{} of {} points remaining after homography correction",
        kept.len(),
        set.len()
    );
    Ok((kept, select(&corrected, &keep)))
}

fn xy_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (b[0] - a[0]).hypot(b[1] - a[1])
}

/// Fits a homography to every image pair of a sequence to capture camera motion.
///
/// Points are seeded and tracked in the static parts of the scene, selected by the mask.
pub struct HomographyPipeline<'a> {
    camera: &'a CameraModel,
    params: HomographyParams,
    mask: Option<&'a dyn MaskProvider>,
}

impl<'a> HomographyPipeline<'a> {
    /// Create a pipeline for images taken by `camera`.
    pub fn new(camera: &'a CameraModel, params: HomographyParams) -> Self {
        Self {
            camera,
            params,
            mask: None,
        }
    }

    /// Restrict seeding to the non-zero pixels of a mask.
    pub fn with_mask(mut self, mask: &'a dyn MaskProvider) -> Self {
        self.mask = Some(mask);
        self
    }

    /// The pipeline parameters.
    pub fn params(&self) -> &HomographyParams {
        &self.params
    }

    /// Fit the homography between two images.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::InsufficientFeatures`] when too few points are seeded or
    /// tracked, or [`VelocityError::HomographyFitFailure`] when no homography fits them.
    pub fn run_pair(
        &self,
        prev: &Image<f32, 1>,
        next: &Image<f32, 1>,
    ) -> Result<HomographyResult, VelocityError> {
        let p = &self.params;

        enter(PairState::Seed);
        let mask = image_mask(self.mask, prev.size())?;
        let seeds = seed_sparse(prev, mask.as_ref(), &p.corners, p.tracking.min_features)?;

        enter(PairState::Track);
        let tracked = track(prev, next, &seeds, &p.tracking)?;
        let (tracked, _) = undistort(self.camera, p.correct_distortion, tracked, prev.size())?;

        enter(PairState::Fit);
        estimate_homography(&tracked, p.method, &p.ransac)
    }

    /// Fit a homography to every consecutive image pair.
    ///
    /// A pair whose fit fails gets `None` and its velocities are left uncorrected.
    ///
    /// # Errors
    ///
    /// Returns an error only when the provider fails to supply an image.
    pub fn run_sequence(
        &self,
        provider: &mut dyn ImageProvider,
    ) -> Result<Vec<Option<HomographyResult>>, VelocityError> {
        let names = (0..provider.len())
            .map(|i| provider.name(i))
            .collect::<Vec<_>>();
        for_each_pair(provider, |i, prev, next| {
            self.run_pair(prev, next)
                .map_err(|e| {
                    log::warn!(
                        "no homography for {} and {}, velocities will not be corrected: {e}",
                        names[i],
                        names[i + 1]
                    );
                })
                .ok()
        })
    }
}

/// Computes the velocities of points tracked between consecutive images.
pub struct VelocityPipeline<'a> {
    camera: &'a CameraModel,
    params: VelocityParams,
    mask: Option<&'a dyn MaskProvider>,
    dem_mask: Option<Vec<bool>>,
}

impl<'a> VelocityPipeline<'a> {
    /// Create a pipeline for images taken by `camera`.
    pub fn new(camera: &'a CameraModel, params: VelocityParams) -> Self {
        Self {
            camera,
            params,
            mask: None,
            dem_mask: None,
        }
    }

    /// Restrict sparse seeding to the non-zero pixels of a mask.
    pub fn with_mask(mut self, mask: &'a dyn MaskProvider) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Restrict dense seeding to the DEM cells where `mask` is true, row-major.
    pub fn with_dem_mask(mut self, mask: Vec<bool>) -> Self {
        self.dem_mask = Some(mask);
        self
    }

    /// The pipeline parameters.
    pub fn params(&self) -> &VelocityParams {
        &self.params
    }

    fn track_pair(
        &self,
        prev: &Image<f32, 1>,
        next: &Image<f32, 1>,
    ) -> Result<TrackedPointSet, VelocityError> {
        enter(PairState::Seed);
        match &self.params.method {
            VelocityMethod::Sparse { corners, tracking } => {
                let mask = image_mask(self.mask, prev.size())?;
                let seeds = seed_sparse(prev, mask.as_ref(), corners, tracking.min_features)?;
                enter(PairState::Track);
                track(prev, next, &seeds, tracking)
            }
            VelocityMethod::Dense {
                grid_spacing,
                tracking,
            } => {
                let grid = seed_dense(
                    &**self.camera.dem(),
                    *grid_spacing,
                    self.camera,
                    self.dem_mask.as_deref(),
                )?;
                let seeds = select(&grid.image, &grid.in_frame);
                enter(PairState::Track);
                match tracking {
                    DenseTracking::OpticalFlow(p) => track(prev, next, &seeds, p),
                    DenseTracking::Template(p) => template_match(prev, next, &seeds, p),
                }
            }
        }
    }

    fn records(
        &self,
        set: &TrackedPointSet,
        corrected: Option<&[[f64; 2]]>,
        lens: Option<&DistortionCorrection>,
    ) -> Result<Vec<VelocityRecord>, VelocityError> {
        enter(PairState::Project);
        let end = corrected.unwrap_or(set.tracked());
        // corrected pixels are projected through the calibrated camera matrix
        let invproject = |uv: &[[f64; 2]]| match lens {
            Some(l) => self.camera.invproject(&l.to_camera(uv)),
            None => self.camera.invproject(uv),
        };
        let world_start = invproject(set.seeds())?;
        let world_end = invproject(end)?;
        let world_back = set.backtracked().map(invproject).transpose()?;

        enter(PairState::Velocity);
        let records = (0..set.len())
            .map(|i| {
                let (s, t, e) = (set.seeds()[i], set.tracked()[i], end[i]);
                VelocityRecord {
                    world_velocity: xy_distance(&world_start[i], &world_end[i]),
                    world_start: world_start[i],
                    world_end: world_end[i],
                    world_error: world_back
                        .as_ref()
                        .map(|b| xy_distance(&world_start[i], &b[i])),
                    pixel_velocity: (e[0] - s[0]).hypot(e[1] - s[1]),
                    pixel_start: s,
                    pixel_end: t,
                    pixel_corrected: corrected.map(|c| c[i]),
                    pixel_error: set.errors()[i],
                }
            })
            .collect::<Vec<_>>();

        let finite = records
            .iter()
            .filter(|r| r.world_velocity.is_finite())
            .map(|r| r.world_velocity)
            .collect::<Vec<_>>();
        if !finite.is_empty() {
            log::info!(
                "{} velocities, {} on the DEM, mean {:.3}",
                records.len(),
                finite.len(),
                finite.iter().sum::<f64>() / finite.len() as f64
            );
        }
        Ok(records)
    }

    /// Compute the velocities between two images.
    ///
    /// # Arguments
    ///
    /// * `prev` - The first image.
    /// * `next` - The second image.
    /// * `homography` - The camera motion between both images, if known. A homography that
    ///   cannot be inverted is ignored and the points are left uncorrected.
    ///
    /// # Returns
    ///
    /// One record per surviving point. World positions outside the projected DEM are NaN.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::InsufficientFeatures`] when too few points are seeded or
    /// tracked, or a camera error when the DEM is not visible in the image.
    pub fn run_pair(
        &self,
        prev: &Image<f32, 1>,
        next: &Image<f32, 1>,
        homography: Option<&HomographyResult>,
    ) -> Result<Vec<VelocityRecord>, VelocityError> {
        let tracked = self.track_pair(prev, next)?;
        let (tracked, lens) = undistort(
            self.camera,
            self.params.correct_distortion,
            tracked,
            prev.size(),
        )?;

        match homography.map(|h| correct_homography(&tracked, h)) {
            Some(Ok((kept, corrected))) => {
                self.records(&kept, Some(corrected.as_slice()), lens.as_ref())
            }
            Some(Err(e)) => {
                log::warn!("homography cannot be applied, tracked points are not corrected: {e}");
                self.records(&tracked, None, lens.as_ref())
            }
            None => {
                log::info!("no homography given, tracked points are not corrected");
                self.records(&tracked, None, lens.as_ref())
            }
        }
    }

    /// Compute the velocities between every consecutive image pair.
    ///
    /// # Arguments
    ///
    /// * `provider` - The image sequence.
    /// * `homographies` - Camera motion per pair, as returned by
    ///   [`HomographyPipeline::run_sequence`].
    ///
    /// # Errors
    ///
    /// Returns an error only when the provider fails to supply an image or the number of
    /// homographies does not match the number of pairs. Failing pairs are reported as
    /// [`PairOutcome::Skipped`].
    pub fn run_sequence(
        &self,
        provider: &mut dyn ImageProvider,
        homographies: Option<&[Option<HomographyResult>]>,
    ) -> Result<Vec<PairVelocities>, VelocityError> {
        let pairs = provider.len().saturating_sub(1);
        if let Some(h) = homographies {
            if h.len() != pairs {
                return Err(VelocityError::InvalidParameter(format!(
                    "{} homographies for {pairs} image pairs",
                    h.len()
                )));
            }
        }

        let names = (0..provider.len())
            .map(|i| provider.name(i))
            .collect::<Vec<_>>();
        for_each_pair(provider, |i, prev, next| {
            let homography = homographies.and_then(|h| h[i].as_ref());
            let outcome = match self.run_pair(prev, next, homography) {
                Ok(records) => PairOutcome::Success(records),
                Err(e) => {
                    log::warn!("skipping {} and {}: {e}", names[i], names[i + 1]);
                    PairOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
            };
            PairVelocities {
                first: names[i].clone(),
                second: names[i + 1].clone(),
                outcome,
            }
        })
    }
}
