use std::io::Write;

use approx::assert_relative_eq;
use oblique_3d::{
    camera::{CameraModel, ProjectionDistortion},
    config::CamEnvConfig,
    dem::{Dem, RasterDem},
    gcp::{gcp_residuals, read_gcps},
};
use oblique_image::ImageSize;

const CALIBRATION: &str = "\
RadialDistortion
[-0.05 0.01]
TangentialDistortion
[0 0]
IntrinsicMatrix
[1000 0 0]
[0 1000 0]
[500 400 1]
End
";

fn write_file(dir: &std::path::Path, name: &str, content: &str) -> std::io::Result<()> {
    std::fs::File::create(dir.join(name))?.write_all(content.as_bytes())
}

fn flat_dem() -> Result<RasterDem, Box<dyn std::error::Error>> {
    let x = (0..81).map(|i| -400.0 + 10.0 * i as f64).collect::<Vec<_>>();
    let y = (0..71).map(|i| -100.0 + 10.0 * i as f64).collect::<Vec<_>>();
    Ok(RasterDem::from_fn(x, y, |_, _| 0.0)?)
}

fn setup() -> Result<(tempfile::TempDir, CamEnvConfig), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "calib.txt", CALIBRATION)?;
    let env = format!(
        "camera_environment_name\nsynthetic\n\
         dem_path\ndem.asc\n\
         image_path\nref.png\n\
         calibration_path\n[{}]\n\
         camera_location\n[0 -200 100]\n\
         yaw_pitch_roll\n[{} {} 0.0]   # looking north, 20 degrees down\n\
         gcp_path\n{}\n",
        dir.path().join("calib.txt").display(),
        std::f64::consts::FRAC_PI_2,
        20f64.to_radians(),
        dir.path().join("gcps.txt").display(),
    );
    write_file(dir.path(), "env.txt", &env)?;
    let config = CamEnvConfig::from_file(dir.path().join("env.txt"))?;
    Ok((dir, config))
}

#[test]
fn camera_from_environment_file() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = setup()?;
    assert_eq!(config.name, "synthetic");
    assert_eq!(config.dem_densification, 1);

    let camera = CameraModel::from_config(
        &config,
        &flat_dem()?,
        ImageSize {
            width: 1000,
            height: 800,
        },
    )?;
    assert_eq!(camera.intrinsics().focal_length(), (1000.0, 1000.0));
    assert_eq!(camera.dem().shape(), (71, 81));

    // the optical axis hits the ground 100 / tan(20) metres ahead of the camera
    let ahead = 100.0 / 20f64.to_radians().tan();
    let proj = camera.project(&[[0.0, -200.0 + ahead, 0.0]]);
    assert_relative_eq!(proj.uv[0][0], 500.0, epsilon = 1e-6);
    assert_relative_eq!(proj.uv[0][1], 400.0, epsilon = 1e-6);
    Ok(())
}

#[test]
fn oblique_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = setup()?;
    let camera = CameraModel::from_config(
        &config,
        &flat_dem()?,
        ImageSize {
            width: 1000,
            height: 800,
        },
    )?;

    let world = [[20.0, 150.0, 0.0], [-80.0, 40.0, 0.0], [150.0, 400.0, 0.0]];
    let proj = camera.project(&world);
    assert!(proj.in_frame.iter().all(|&f| f));

    let back = camera.invproject(&proj.uv)?;
    for (b, w) in back.iter().zip(world.iter()) {
        assert!((b[0] - w[0]).hypot(b[1] - w[1]) < 1.0, "{b:?} vs {w:?}");
        assert!(b[2].abs() < 1e-9);
    }

    // above the horizon there is no terrain
    let sky = camera.invproject(&[[500.0, 5.0]])?;
    assert!(sky[0][0].is_nan());
    Ok(())
}

#[test]
fn gcp_reprojection() -> Result<(), Box<dyn std::error::Error>> {
    let (dir, config) = setup()?;
    let camera = CameraModel::from_config(
        &config,
        &flat_dem()?,
        ImageSize {
            width: 1000,
            height: 800,
        },
    )?
    .with_projection_distortion(ProjectionDistortion::Enabled);

    let world = [[0.0, 100.0, 0.0], [50.0, 200.0, 0.0], [-60.0, 60.0, 0.0]];
    let uv = camera.project(&world).uv;
    let rows = world
        .iter()
        .zip(uv.iter())
        .map(|(w, p)| format!("{} {} {} {} {}", w[0], w[1], w[2], p[0] + 1.0, p[1]))
        .collect::<Vec<_>>()
        .join("\n");
    write_file(dir.path(), "gcps.txt", &format!("# x y z u v\n{rows}\n"))?;

    let gcp_path = config.gcp_path.as_ref().ok_or("missing gcp path")?;
    let gcps = read_gcps(gcp_path)?;
    assert_eq!(gcps.len(), 3);

    let residuals = gcp_residuals(&camera, &gcps);
    assert_relative_eq!(residuals.rms, 1.0, epsilon = 1e-6);
    Ok(())
}
