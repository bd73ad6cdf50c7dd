//! Benchmarks for iMAD change detection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use sandwatch_algorithms::change::{
    imad, weighted_covariance, ImadParams, PixelStack, WeightField,
};
use sandwatch_core::MultibandRaster;

const BANDS: usize = 4;

/// Two related 4-band acquisitions with a changed square in the middle
fn create_pair(size: usize) -> (MultibandRaster, MultibandRaster) {
    let texture = |row: usize, col: usize, band: usize| {
        ((row * 7 + col * 13 + band * 31) % 200) as f64 + ((row * col + band) % 17) as f64 * 0.5
    };
    let lo = size * 2 / 5;
    let hi = size * 3 / 5;

    let before: Vec<Array2<f64>> = (0..BANDS)
        .map(|b| Array2::from_shape_fn((size, size), |(r, c)| texture(r, c, b)))
        .collect();
    let after: Vec<Array2<f64>> = (0..BANDS)
        .map(|b| {
            Array2::from_shape_fn((size, size), |(r, c)| {
                if (lo..hi).contains(&r) && (lo..hi).contains(&c) {
                    400.0 + ((r + c + b) % 11) as f64
                } else {
                    0.9 * texture(r, c, b) + 5.0 + ((r * 3 + c * 5 + b) % 7) as f64
                }
            })
        })
        .collect();

    (
        MultibandRaster::from_arrays(before).unwrap(),
        MultibandRaster::from_arrays(after).unwrap(),
    )
}

fn bench_imad(c: &mut Criterion) {
    let mut group = c.benchmark_group("change/imad");
    group.sample_size(10);
    for size in [128, 256, 512] {
        let (before, after) = create_pair(size);
        let params = ImadParams { max_iterations: 5, ..Default::default() };
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| imad(black_box(&before), black_box(&after), params.clone()).unwrap())
        });
    }
    group.finish();
}

fn bench_covariance(c: &mut Criterion) {
    let mut group = c.benchmark_group("change/weighted_covariance");
    for size in [256, 1024] {
        let (before, after) = create_pair(size);
        let pixels = PixelStack::from_pair(&before, &after).unwrap();
        let weights = WeightField::ones(pixels.len());
        let params = ImadParams::default();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| weighted_covariance(black_box(&pixels), black_box(&weights), &params).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_imad, bench_covariance);
criterion_main!(benches);
