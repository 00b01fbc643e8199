//! Full-batch solve cost as the correspondence history grows.
//!
//! Run with: `cargo bench -p georef-align-core`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use georef_align_core::{
    AlignmentResidual, CorrespondencePoint, LevenbergMarquardt, SolverOptions, TransformEstimate,
};
use nalgebra::Point2;

fn trajectory(truth: &TransformEstimate, n: usize) -> Vec<AlignmentResidual> {
    (0..n)
        .map(|i| {
            let s = i as f64 * 0.25;
            let w = Point2::new(s + 3.0 * (0.1 * s).sin(), 0.4 * s);
            AlignmentResidual::from(CorrespondencePoint::new(w, truth.apply(w)))
        })
        .collect()
}

fn bench_batch_solve(c: &mut Criterion) {
    let truth = TransformEstimate::new([448_251.3, 5_411_932.8], 0.83);
    let solver = LevenbergMarquardt::new(SolverOptions::default());
    let start = TransformEstimate::new([448_200.0, 5_411_900.0], 0.5);

    let mut group = c.benchmark_group("batch_solve");
    for n in [10usize, 100, 1_000, 10_000] {
        let blocks = trajectory(&truth, n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &blocks, |b, blocks| {
            b.iter(|| solver.minimize(black_box(blocks), start))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_batch_solve);
criterion_main!(benches);
