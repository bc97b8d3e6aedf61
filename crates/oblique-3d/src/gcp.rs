use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::camera::CameraModel;
use crate::error::CameraError;

/// A point with known world and image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundControlPoint {
    /// World coordinates (x, y, z).
    pub world: [f64; 3],
    /// Pixel coordinates (u, v) in the reference image.
    pub image: [f64; 2],
}

/// Reprojection residuals of a set of ground control points.
#[derive(Debug, Clone, PartialEq)]
pub struct GcpResiduals {
    /// Projected minus observed pixel position of every point.
    pub residuals: Vec<[f64; 2]>,
    /// Root mean square of the residual lengths over the points in front of the camera.
    pub rms: f64,
}

/// Parse ground control points from rows of `x y z u v`.
///
/// Blank lines and text after `#` are ignored.
pub fn parse_gcps(text: &str) -> Result<Vec<GroundControlPoint>, CameraError> {
    let mut gcps = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let values = line
            .replace(',', " ")
            .split_whitespace()
            .map(|v| {
                v.parse::<f64>().map_err(|e| CameraError::Parse {
                    line: i + 1,
                    message: format!("`{v}`: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let [x, y, z, u, v] = <[f64; 5]>::try_from(values.as_slice()).map_err(|_| {
            CameraError::Parse {
                line: i + 1,
                message: format!("expected 5 values, got {}", values.len()),
            }
        })?;
        gcps.push(GroundControlPoint {
            world: [x, y, z],
            image: [u, v],
        });
    }
    Ok(gcps)
}

/// Read a ground control points file, see [`parse_gcps`].
pub fn read_gcps(path: impl AsRef<Path>) -> Result<Vec<GroundControlPoint>, CameraError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| CameraError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_gcps(&text)
}

/// Project ground control points with `camera` and compare them with their observed pixels.
pub fn gcp_residuals(camera: &CameraModel, gcps: &[GroundControlPoint]) -> GcpResiduals {
    let world = gcps.iter().map(|g| g.world).collect::<Vec<_>>();
    let projection = camera.project(&world);

    let residuals = projection
        .uv
        .iter()
        .zip(gcps)
        .map(|(uv, g)| [uv[0] - g.image[0], uv[1] - g.image[1]])
        .collect::<Vec<_>>();

    let finite = residuals
        .iter()
        .filter(|r| r[0].is_finite() && r[1].is_finite())
        .map(|r| r[0] * r[0] + r[1] * r[1])
        .collect::<Vec<_>>();
    let rms = if finite.is_empty() {
        f64::NAN
    } else {
        (finite.iter().sum::<f64>() / finite.len() as f64).sqrt()
    };
    log::debug!("GCP reprojection rms {rms:.3} px over {} points", finite.len());

    GcpResiduals { residuals, rms }
}
