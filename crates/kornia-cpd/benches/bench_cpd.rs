use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use kornia_cpd::{
    kernel::gaussian_kernel, register_deformable, utils::points_to_mat, DeformableParams,
    EMParams,
};

fn create_random_points(num_points: usize) -> Vec<[f64; 3]> {
    (0..num_points)
        .map(|_| {
            [
                rand::random::<f64>(),
                rand::random::<f64>(),
                rand::random::<f64>(),
            ]
        })
        .collect()
}

fn bench_gaussian_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("gaussian_kernel");

    for num_points in [100, 500, 1000].iter() {
        let points = points_to_mat(&create_random_points(*num_points));

        group.bench_with_input(
            BenchmarkId::new("gaussian_kernel", num_points),
            &points,
            |b, points| b.iter(|| black_box(gaussian_kernel(points.as_ref(), 2.0))),
        );
    }

    group.finish();
}

fn bench_register_deformable(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_deformable");
    group.sample_size(10);

    for num_points in [50, 200].iter() {
        let source = create_random_points(*num_points);
        let target = source
            .iter()
            .map(|p| [p[0] + 0.05 * p[1].sin(), p[1], p[2] + 0.05 * p[0].cos()])
            .collect::<Vec<_>>();

        let em_params = EMParams {
            max_iterations: 20,
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::new("register_deformable", num_points),
            &(source, target),
            |b, (source, target)| {
                b.iter(|| {
                    black_box(register_deformable(
                        target,
                        source,
                        &em_params,
                        &DeformableParams::default(),
                    ))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_gaussian_kernel, bench_register_deformable);
criterion_main!(benches);
