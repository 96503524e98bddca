//! Per-frame pipeline benchmarks.

use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::Vector3;

use ghana_fusion::algorithms::fusion::{integrate, scale_depth, TsdfVolume, VolumeConfig};
use ghana_fusion::algorithms::raycasting::raycast;
use ghana_fusion::core::types::{CameraPose, DepthImage, Intrinsics, MapImage, ScaledDepthImage};
use ghana_fusion::sensors::preprocessing::{bilateral_filter, BilateralConfig};
use ghana_fusion::{Tracker, TrackerConfig};

const ROWS: usize = 240;
const COLS: usize = 320;

fn synthetic_depth() -> DepthImage {
    let mut depth = DepthImage::new(ROWS, COLS, 0);
    for row in 0..ROWS {
        for col in 0..COLS {
            // Curved, tilted surface so tracking stays well-conditioned
            // in all six degrees of freedom.
            let dr = row as f32 - ROWS as f32 / 2.0;
            let dc = col as f32 - COLS as f32 / 2.0;
            let mm = 950.0 + (dr * dr + dc * dc) * 0.005 + dr * 0.3 + dc * 0.15;
            depth.set(row, col, mm as u16);
        }
    }
    depth
}

fn intrinsics() -> Intrinsics {
    Intrinsics::new(262.5, 262.5, COLS as f32 / 2.0, ROWS as f32 / 2.0)
}

fn bench_bilateral(c: &mut Criterion) {
    let depth = synthetic_depth();
    let mut out = DepthImage::new(ROWS, COLS, 0);
    let config = BilateralConfig::default();
    c.bench_function("bilateral_320x240", |b| {
        b.iter(|| bilateral_filter(&depth, &mut out, &config))
    });
}

fn bench_integrate(c: &mut Criterion) {
    let mut volume = TsdfVolume::new(&VolumeConfig {
        resolution: [128, 128, 128],
        size: [3.0, 3.0, 3.0],
    });
    let pose = CameraPose::new(nalgebra::Rotation3::identity(), Vector3::new(1.5, 1.5, -0.3));
    let intr = intrinsics();
    let mut scaled = ScaledDepthImage::new(ROWS, COLS, 0.0);
    scale_depth(&synthetic_depth(), &intr, &mut scaled);
    let mu = volume.min_truncation();

    c.bench_function("integrate_128", |b| {
        b.iter(|| integrate(&mut volume, &scaled, &intr, &pose, mu))
    });
}

fn bench_raycast(c: &mut Criterion) {
    let mut volume = TsdfVolume::new(&VolumeConfig {
        resolution: [128, 128, 128],
        size: [3.0, 3.0, 3.0],
    });
    let pose = CameraPose::new(nalgebra::Rotation3::identity(), Vector3::new(1.5, 1.5, -0.3));
    let intr = intrinsics();
    let mut scaled = ScaledDepthImage::new(ROWS, COLS, 0.0);
    scale_depth(&synthetic_depth(), &intr, &mut scaled);
    let mu = volume.min_truncation();
    integrate(&mut volume, &scaled, &intr, &pose, mu);

    let mut vmap = MapImage::new(ROWS, COLS, Vector3::repeat(f32::NAN));
    let mut nmap = MapImage::new(ROWS, COLS, Vector3::repeat(f32::NAN));
    c.bench_function("raycast_320x240", |b| {
        b.iter(|| raycast(&volume, &intr, &pose, mu, &mut vmap, &mut nmap))
    });
}

fn bench_full_frame(c: &mut Criterion) {
    let depth = synthetic_depth();
    let mut tracker = Tracker::with_config(
        ROWS,
        COLS,
        TrackerConfig {
            volume: VolumeConfig {
                resolution: [128, 128, 128],
                size: [3.0, 3.0, 3.0],
            },
            ..TrackerConfig::default()
        },
    )
    .unwrap();
    tracker.set_depth_intrinsics(262.5, 262.5, None, None);
    tracker.process(&depth);

    c.bench_function("track_frame_320x240", |b| b.iter(|| tracker.process(&depth)));
}

criterion_group!(
    benches,
    bench_bilateral,
    bench_integrate,
    bench_raycast,
    bench_full_frame
);
criterion_main!(benches);
