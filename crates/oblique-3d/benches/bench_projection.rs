use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oblique_3d::{
    camera::{CameraModel, CameraPose, IntrinsicModel},
    dem::{Dem, RasterDem},
    homography::{find_homography, HomographyMethod, RansacParams},
    viewshed::viewshed,
};
use oblique_image::ImageSize;

fn hills(cells: usize) -> RasterDem {
    let axis = (0..cells)
        .map(|i| i as f64 * 2000.0 / (cells - 1) as f64)
        .collect::<Vec<_>>();
    RasterDem::from_fn(axis.clone(), axis, |x, y| {
        50.0 * (x / 300.0).sin() * (y / 200.0).cos() + 0.05 * y
    })
    .unwrap()
}

fn oblique_camera(dem: RasterDem) -> CameraModel {
    let intrinsics = IntrinsicModel::new(
        [[1500.0, 0.0, 0.0], [0.0, 1500.0, 0.0], [960.0, 640.0, 1.0]],
        &[],
        &[],
    )
    .unwrap();
    // on the southern edge looking north and slightly down
    let pose = CameraPose::from_degrees([1000.0, -300.0, 300.0], [90.0, 15.0, 0.0]);
    CameraModel::new(
        intrinsics,
        pose,
        ImageSize {
            width: 1920,
            height: 1280,
        },
        Arc::new(dem),
    )
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Projection");

    for cells in [101, 201].iter() {
        let dem = hills(*cells);
        let parameter_string = format!("{cells}x{cells}");

        group.bench_with_input(
            BenchmarkId::new("viewshed", &parameter_string),
            &dem,
            |b, d| b.iter(|| black_box(viewshed(d, [1000.0, -300.0, 300.0]))),
        );

        let points = (0..dem.heights().len())
            .map(|i| {
                let (r, c) = (i / cells, i % cells);
                [dem.x_coords()[c], dem.y_coords()[r], dem.heights()[i]]
            })
            .collect::<Vec<_>>();
        let camera = oblique_camera(dem);

        group.bench_with_input(
            BenchmarkId::new("project", &parameter_string),
            &points,
            |b, p| b.iter(|| black_box(camera.project(p))),
        );

        let pixels = (0..1000)
            .map(|i| [200.0 + (i % 40) as f64 * 38.0, 700.0 + (i / 40) as f64 * 20.0])
            .collect::<Vec<_>>();
        camera.inverse_projection_grid().unwrap();

        group.bench_with_input(
            BenchmarkId::new("invproject", &parameter_string),
            &pixels,
            |b, p| b.iter(|| black_box(camera.invproject(p))),
        );
    }

    let src = (0..500)
        .map(|i| [(i % 25) as f64 * 40.0, (i / 25) as f64 * 30.0])
        .collect::<Vec<_>>();
    let dst = src
        .iter()
        .map(|p| [p[0] * 1.01 + 3.0, p[1] * 0.99 - 2.0])
        .collect::<Vec<_>>();
    let params = RansacParams {
        random_seed: Some(0),
        ..Default::default()
    };
    group.bench_function("find_homography_ransac", |b| {
        b.iter(|| black_box(find_homography(&src, &dst, HomographyMethod::default(), &params)))
    });

    group.finish();
}

criterion_group!(benches, bench_projection);
criterion_main!(benches);
