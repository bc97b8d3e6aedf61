use argh::FromArgs;
use std::path::PathBuf;
use std::sync::Arc;

use oblique::image::{Image, ImageSize};
use oblique::o3d::camera::{CameraModel, CameraPose, IntrinsicModel};
use oblique::o3d::dem::RasterDem;
use oblique::velocity::pipeline::{
    DenseTracking, HomographyParams, HomographyPipeline, PairOutcome, VelocityMethod,
    VelocityParams, VelocityPipeline,
};
use oblique::velocity::provider::InMemorySequence;
use oblique::velocity::tracker::TemplateParams;

#[derive(FromArgs)]
/// Track a synthetic drifting texture seen by a nadir camera and print its velocities
struct Args {
    /// number of frames in the sequence
    #[argh(option, default = "4")]
    frames: usize,

    /// horizontal drift between frames in pixels
    #[argh(option, default = "1.5")]
    shift: f64,

    /// track a dense grid with template matching instead of sparse corners
    #[argh(switch)]
    dense: bool,

    /// grid spacing in metres for the dense method
    #[argh(option, default = "10.0")]
    spacing: f64,

    /// fit homographies and remove camera motion before computing velocities
    #[argh(switch)]
    homography: bool,

    /// optional JSON file with the velocity parameters, overrides the method flags
    #[argh(option)]
    params: Option<PathBuf>,

    /// optional path to write the results as JSON
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

const SIZE: ImageSize = ImageSize {
    width: 320,
    height: 240,
};

fn texture(x: f64, y: f64) -> u8 {
    (100.0 + 40.0 * (x / 4.0).sin() + 40.0 * (y / 5.0).cos() + 20.0 * ((x + y) / 7.0).sin())
        .round() as u8
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    // a camera 120 m above flat ground at 20 m, 1 px covers 0.5 m
    let intrinsics = IntrinsicModel::new(
        [[200.0, 0.0, 0.0], [0.0, 200.0, 0.0], [160.0, 120.0, 1.0]],
        &[],
        &[],
    )?;
    let axis = (0..=100).map(|i| -150.0 + 3.0 * i as f64).collect::<Vec<_>>();
    let dem = RasterDem::from_fn(axis.clone(), axis, |_, _| 20.0)?;
    let camera = CameraModel::new(
        intrinsics,
        CameraPose::from_degrees([0.0, 0.0, 120.0], [0.0, 90.0, 0.0]),
        SIZE,
        Arc::new(dem),
    );

    let mut sequence = InMemorySequence::new();
    for i in 0..args.frames {
        let dx = args.shift * i as f64;
        // texture in the green band
        let rgb = Image::<u8, 3>::from_fn(SIZE, |x, y| {
            let g = texture(x as f64 - dx, y as f64);
            [g / 2, g, g / 3]
        });
        sequence.push_band(format!("frame_{i:03}"), &rgb, 1)?;
    }

    let params = match &args.params {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None if args.dense => VelocityParams {
            method: VelocityMethod::Dense {
                grid_spacing: [args.spacing, args.spacing],
                tracking: DenseTracking::Template(TemplateParams::default()),
            },
            ..Default::default()
        },
        None => VelocityParams::default(),
    };
    log::info!("velocity parameters {}", serde_json::to_string(&params)?);

    let homographies = if args.homography {
        let mut static_scene = sequence.clone();
        let pipeline = HomographyPipeline::new(&camera, HomographyParams::default());
        Some(pipeline.run_sequence(&mut static_scene)?)
    } else {
        None
    };

    let pipeline = VelocityPipeline::new(&camera, params);
    let pairs = pipeline.run_sequence(&mut sequence, homographies.as_deref())?;

    for pair in &pairs {
        match &pair.outcome {
            PairOutcome::Success(records) => {
                let finite = records
                    .iter()
                    .filter(|r| r.world_velocity.is_finite())
                    .map(|r| r.world_velocity)
                    .collect::<Vec<_>>();
                let mean = finite.iter().sum::<f64>() / finite.len().max(1) as f64;
                println!(
                    "{} -> {}: {} points, mean velocity {mean:.3} m",
                    pair.first,
                    pair.second,
                    records.len()
                );
            }
            PairOutcome::Skipped { reason } => {
                println!("{} -> {}: skipped ({reason})", pair.first, pair.second);
            }
        }
    }

    if let Some(path) = args.output {
        std::fs::write(&path, serde_json::to_string_pretty(&pairs)?)?;
        println!("results written to {}", path.display());
    }

    Ok(())
}
