//! Benchmarks for argentum-core stage operators
//!
//! Run with: cargo bench -p argentum-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use argentum_core::decoders::Sidecar;
use argentum_core::matrix::Matrix;
use argentum_core::params::DemosaicParams;
use argentum_core::stages::curves::{film_like_curve, shadows_highlights, Lut};
use argentum_core::stages::demosaic::demosaic_image;
use argentum_core::stages::highlight::clip_highlights;

/// Synthetic Bayer mosaic with a smooth gradient.
fn generate_mosaic(size: usize) -> Matrix<f32> {
    let mut m = Matrix::with_size(size, size);
    for r in 0..size {
        for c in 0..size {
            let x = c as f32 / size as f32;
            let y = r as f32 / size as f32;
            m[(r, c)] = 1023.0 * (0.1 + 0.8 * (x + y) / 2.0);
        }
    }
    m
}

fn bench_demosaic(c: &mut Criterion) {
    let mut group = c.benchmark_group("demosaic");

    for size in [256, 512, 1024].iter() {
        let mosaic = generate_mosaic(*size);
        let mut sidecar = Sidecar::neutral(*size, *size);
        sidecar.max_value = 1023.0;
        let params = DemosaicParams::default();

        group.throughput(Throughput::Elements((*size * *size) as u64));
        group.bench_with_input(
            BenchmarkId::new("bayer", format!("{size}x{size}")),
            size,
            |b, _| {
                b.iter(|| demosaic_image(black_box(&mosaic), black_box(&sidecar), &params));
            },
        );
    }
    group.finish();
}

fn bench_curves(c: &mut Criterion) {
    let mut group = c.benchmark_group("curves");

    let lut = Lut::fill(|v| {
        (65535.0 * shadows_highlights(v as f32 / 65535.0, 0.2, 0.15, 0.8, 0.9)).round() as u16
    });
    let mut image: Matrix<u16> = Matrix::with_size(1024, 1024 * 3);
    for (i, v) in image.as_mut_slice().iter_mut().enumerate() {
        *v = (i % 65536) as u16;
    }

    group.throughput(Throughput::Elements(1024 * 1024));
    group.bench_function("film_like_curve_1024", |b| {
        b.iter(|| film_like_curve(black_box(&image), black_box(&lut)));
    });

    group.bench_function("lut_fill", |b| {
        b.iter(|| {
            Lut::fill(|v| {
                (65535.0 * shadows_highlights(v as f32 / 65535.0, 0.2, 0.15, 0.8, 0.9)).round()
                    as u16
            })
        });
    });
    group.finish();
}

fn bench_highlight(c: &mut Criterion) {
    let mut group = c.benchmark_group("highlight");

    let mut image = Matrix::with_size(1024, 1024 * 3);
    for (i, v) in image.as_mut_slice().iter_mut().enumerate() {
        *v = (i % 80000) as f32;
    }

    group.throughput(Throughput::Elements(1024 * 1024));
    group.bench_function("clip_1024", |b| {
        b.iter(|| clip_highlights(black_box(&image)));
    });
    group.finish();
}

criterion_group!(benches, bench_demosaic, bench_curves, bench_highlight);
criterion_main!(benches);
