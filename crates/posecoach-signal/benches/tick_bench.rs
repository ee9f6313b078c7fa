//! Benchmarks for the per-tick signal path
//!
//! Run with: cargo bench --package posecoach-signal

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use posecoach_core::{Confidence, FrameId, Keypoint, KeypointType, PoseFrame, Timestamp};
use posecoach_signal::{
    FeatureEngine, FeatureEngineConfig, FeatureKey, MotionBuffer, MotionBufferConfig,
};

/// Side-on plank with a small breathing oscillation.
fn plank_frame(i: u64) -> PoseFrame {
    let wobble = 0.005 * ((i as f32) * 0.7).sin();
    let points = KeypointType::all().iter().map(|&kind| {
        let t = kind.index() as f32 / 16.0;
        Keypoint::new(
            kind,
            0.5 + wobble,
            0.1 + 0.8 * t,
            Confidence::saturating(0.9),
        )
    });
    PoseFrame::new(FrameId(i), Timestamp::from_millis(i as i64 * 100), points)
}

fn bench_feature_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("Feature Engine");
    group.measurement_time(Duration::from_secs(5));

    for smoothing in [false, true] {
        let mut config = FeatureEngineConfig::default();
        config.smoothing = smoothing;
        let mut engine = FeatureEngine::new(config).unwrap();
        let frames: Vec<PoseFrame> = (0..64).map(plank_frame).collect();

        group.bench_with_input(
            BenchmarkId::new("compute", if smoothing { "ema" } else { "raw" }),
            &frames,
            |b, frames| {
                let mut i = 0;
                b.iter(|| {
                    i = (i + 1) % frames.len();
                    black_box(engine.compute(&frames[i]))
                });
            },
        );
    }
    group.finish();
}

fn bench_buffer_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("Motion Buffer");

    let mut engine = FeatureEngine::new(FeatureEngineConfig::default()).unwrap();
    let mut buffer = MotionBuffer::new(MotionBufferConfig::default()).unwrap();
    for i in 0..48 {
        buffer.push(engine.compute(&plank_frame(i)));
    }
    let now = Timestamp::from_millis(4700);

    group.bench_function("query_body_line", |b| {
        b.iter(|| black_box(buffer.query(FeatureKey::BodyLine, None)))
    });
    group.bench_function("stable_for", |b| {
        b.iter(|| black_box(buffer.stable_for(1000, now)))
    });
    group.bench_function("filtered_visibility", |b| {
        b.iter(|| black_box(buffer.filtered_visibility()))
    });
    group.finish();
}

criterion_group!(benches, bench_feature_engine, bench_buffer_queries);
criterion_main!(benches);
