use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oblique_image::{Image, ImageSize};
use oblique_imgproc::{
    features::{good_features_to_track, CornerParams},
    filter::box_blur,
    optical_flow::{calc_optical_flow_pyr_lk, PyrLkParams},
    template::{match_template_point, TemplateMatchMode},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn noise_image(size: ImageSize, seed: u64) -> Image<f32, 1> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = (0..size.area())
        .map(|_| rng.random_range(0.0..255.0))
        .collect::<Vec<f32>>();
    let noise = Image::<f32, 1>::new(size, noise).unwrap();

    let mut smooth = Image::<f32, 1>::from_size_val(size, 0.0).unwrap();
    box_blur(&noise, &mut smooth, (5, 5)).unwrap();
    smooth
}

fn bench_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("Tracking");

    for (width, height) in [(256, 224), (512, 448)].iter() {
        let size = ImageSize {
            width: *width,
            height: *height,
        };
        let image = noise_image(size, 0);
        let parameter_string = format!("{width}x{height}");

        group.bench_with_input(
            BenchmarkId::new("good_features_to_track", &parameter_string),
            &image,
            |b, i| b.iter(|| black_box(good_features_to_track(i, None, &CornerParams::default()))),
        );

        let corners = good_features_to_track(&image, None, &CornerParams::default())
            .unwrap()
            .iter()
            .take(200)
            .map(|c| [c.x as f64, c.y as f64])
            .collect::<Vec<_>>();

        group.bench_with_input(
            BenchmarkId::new("calc_optical_flow_pyr_lk", &parameter_string),
            &(&image, &corners),
            |b, (i, pts)| {
                b.iter(|| black_box(calc_optical_flow_pyr_lk(i, i, pts, &PyrLkParams::default())))
            },
        );

        group.bench_with_input(
            BenchmarkId::new("match_template_point", &parameter_string),
            &(&image, &corners),
            |b, (i, pts)| {
                b.iter(|| {
                    pts.iter()
                        .filter_map(|&p| {
                            match_template_point(i, i, p, 16, 32, TemplateMatchMode::CCoeffNormed)
                        })
                        .count()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_tracking);
criterion_main!(benches);
