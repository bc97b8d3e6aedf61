use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CameraError;

/// Everything needed to set up a camera, read from a camera environment file.
///
/// The file is a list of keywords, each followed by a line holding its value. Text after
/// `#` is a comment and keywords are matched ignoring case and blanks:
///
/// ```text
/// camera_environment_name
/// KR2_2014
/// dem_path
/// dem/KR_demsmooth.tif
/// image_path
/// images/KR2_2014.JPG
/// calibration_path
/// [calib/KR2_calib_1.txt, calib/KR2_calib_2.txt]
/// camera_location
/// [447948.99 8759457.58 407.92]     # x y z
/// yaw_pitch_roll
/// [1.08 0.01 -0.03]                 # radians
/// dem_densification
/// 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamEnvConfig {
    /// Name of the camera environment.
    pub name: String,
    /// Ground control points file, if any.
    pub gcp_path: Option<PathBuf>,
    /// DEM file.
    pub dem_path: PathBuf,
    /// Reference image.
    pub image_path: PathBuf,
    /// Calibration files, averaged when there are several.
    pub calibration_paths: Vec<PathBuf>,
    /// Camera location (x, y, z).
    pub camera_location: [f64; 3],
    /// Camera orientation (yaw, pitch, roll) in radians.
    pub yaw_pitch_roll: [f64; 3],
    /// Number of DEM intervals created per original interval.
    pub dem_densification: usize,
}

const KEY_NAME: &str = "camera_environment_name";
const KEY_GCP: &str = "gcp_path";
const KEY_DEM: &str = "dem_path";
const KEY_IMAGE: &str = "image_path";
const KEY_CALIBRATION: &str = "calibration_path";
const KEY_LOCATION: &str = "camera_location";
const KEY_YPR: &str = "yaw_pitch_roll";
const KEY_DENSIFY: &str = "dem_densification";

const KEYS: [&str; 8] = [
    KEY_NAME,
    KEY_GCP,
    KEY_DEM,
    KEY_IMAGE,
    KEY_CALIBRATION,
    KEY_LOCATION,
    KEY_YPR,
    KEY_DENSIFY,
];

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default().trim()
}

fn parse_triplet(value: &str, line: usize) -> Result<[f64; 3], CameraError> {
    let values = value
        .replace(['[', ']', ','], " ")
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>().map_err(|e| CameraError::Parse {
                line,
                message: format!("`{v}`: {e}"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    <[f64; 3]>::try_from(values.as_slice()).map_err(|_| CameraError::Parse {
        line,
        message: format!("expected 3 values, got {}", values.len()),
    })
}

impl CamEnvConfig {
    /// Read a camera environment file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CameraError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }
}

impl FromStr for CamEnvConfig {
    type Err = CameraError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let lines = text.lines().collect::<Vec<_>>();

        // value line and its one-based number for every keyword found
        let mut values: [Option<(usize, &str)>; 8] = [None; 8];
        for (i, line) in lines.iter().enumerate() {
            let key = strip_comment(line).to_lowercase().replace(' ', "");
            if let Some(k) = KEYS.iter().position(|&name| name == key) {
                let value = lines.get(i + 1).ok_or_else(|| CameraError::Parse {
                    line: i + 1,
                    message: format!("keyword `{}` has no value line", KEYS[k]),
                })?;
                values[k] = Some((i + 2, strip_comment(value)));
            }
        }

        let get = |key: &'static str| {
            KEYS.iter()
                .position(|&name| name == key)
                .and_then(|k| values[k])
        };
        let require = |key: &'static str| get(key).ok_or(CameraError::MissingKey(key));

        let name = require(KEY_NAME)?.1.to_string();
        let gcp_path = get(KEY_GCP)
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let dem_path = PathBuf::from(require(KEY_DEM)?.1);
        let image_path = PathBuf::from(require(KEY_IMAGE)?.1);

        let calibration_paths = require(KEY_CALIBRATION)?
            .1
            .replace(['[', ']'], "")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        if calibration_paths.is_empty() {
            return Err(CameraError::MissingKey(KEY_CALIBRATION));
        }

        let (line, location) = require(KEY_LOCATION)?;
        let camera_location = parse_triplet(location, line)?;
        let (line, ypr) = require(KEY_YPR)?;
        let yaw_pitch_roll = parse_triplet(ypr, line)?;

        let dem_densification = match get(KEY_DENSIFY) {
            Some((line, v)) => v.parse::<usize>().map_err(|e| CameraError::Parse {
                line,
                message: format!("`{v}`: {e}"),
            })?,
            None => 1,
        };

        Ok(Self {
            name,
            gcp_path,
            dem_path,
            image_path,
            calibration_paths,
            camera_location,
            yaw_pitch_roll,
            dem_densification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV: &str = "\
# camera environment for a test site
Camera_Environment_Name
Test camera   # trailing comment
GCP_path
gcps.txt
DEM_ path
dem.asc
image_path
ref.jpg
calibration_path
[calib_a.txt, calib_b.txt]
camera_location
[100.0 200.5 30]
yaw_pitch_roll
[0.5 0.1 0.0]
";

    #[test]
    fn test_parse_env() -> Result<(), CameraError> {
        let config: CamEnvConfig = ENV.parse()?;
        assert_eq!(config.name, "Test camera");
        assert_eq!(config.gcp_path, Some(PathBuf::from("gcps.txt")));
        assert_eq!(config.dem_path, PathBuf::from("dem.asc"));
        assert_eq!(config.image_path, PathBuf::from("ref.jpg"));
        assert_eq!(
            config.calibration_paths,
            vec![PathBuf::from("calib_a.txt"), PathBuf::from("calib_b.txt")]
        );
        assert_eq!(config.camera_location, [100.0, 200.5, 30.0]);
        assert_eq!(config.yaw_pitch_roll, [0.5, 0.1, 0.0]);
        assert_eq!(config.dem_densification, 1);
        Ok(())
    }

    #[test]
    fn test_optional_and_missing_keys() -> Result<(), CameraError> {
        let no_gcp = ENV.replace("GCP_path\ngcps.txt\n", "") + "dem_densification\n3\n";
        let config: CamEnvConfig = no_gcp.parse()?;
        assert_eq!(config.gcp_path, None);
        assert_eq!(config.dem_densification, 3);

        let no_dem = ENV.replace("DEM_ path\ndem.asc\n", "");
        assert!(matches!(
            no_dem.parse::<CamEnvConfig>(),
            Err(CameraError::MissingKey("dem_path"))
        ));
        Ok(())
    }

    #[test]
    fn test_bad_values() {
        let bad_location = ENV.replace("[100.0 200.5 30]", "[100.0 200.5]");
        assert!(matches!(
            bad_location.parse::<CamEnvConfig>(),
            Err(CameraError::Parse { line: 13, .. })
        ));

        let dangling = format!("{ENV}dem_densification");
        assert!(matches!(
            dangling.parse::<CamEnvConfig>(),
            Err(CameraError::Parse { .. })
        ));
    }
}
