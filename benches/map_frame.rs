//! Criterion benchmarks for the per-frame hot path.
//!
//! The display loop must map, power-check and push every frame inside the frame
//! budget (33 ms at 30 fps). These cover the two CPU-bound steps.
//!
//! Run with: cargo bench --bench map_frame

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledwall::config::DisplayConfig;
use ledwall::frame::TestPattern;
use ledwall::mapper::CoordinateMapper;
use ledwall::power::PowerLimiter;

fn walls() -> Vec<(&'static str, DisplayConfig)> {
    let mut rotated = DisplayConfig::uniform(16, 16, 4, 4);
    for panel in &mut rotated.panels {
        panel.rotation = 90;
    }
    rotated.grid.display_rotation = 180;

    vec![
        ("2x2_of_16x16", DisplayConfig::uniform(16, 16, 2, 2)),
        ("4x4_of_16x16", DisplayConfig::uniform(16, 16, 4, 4)),
        ("4x4_rotated", rotated),
        ("8x4_of_32x8", DisplayConfig::uniform(32, 8, 8, 4)),
    ]
}

fn map_frame_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_frame");

    for (name, config) in walls() {
        let mapper = CoordinateMapper::new(&config);
        let (w, h) = mapper.canvas_dimensions();
        let frame = TestPattern::Gradient.render(w, h);

        group.throughput(Throughput::Elements(config.total_leds() as u64));
        group.bench_with_input(BenchmarkId::new("map", name), &frame, |b, frame| {
            b.iter(|| mapper.map_frame(black_box(frame)));
        });
    }

    group.finish();
}

fn power_limit_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("power_limit");

    for (name, config) in walls() {
        let mapper = CoordinateMapper::new(&config);
        let (w, h) = mapper.canvas_dimensions();
        let physical = mapper.map_frame(&TestPattern::Checkerboard.render(w, h));
        let limiter = PowerLimiter::new(config.total_leds(), 10.0, true, false);

        group.throughput(Throughput::Elements(config.total_leds() as u64));
        group.bench_with_input(
            BenchmarkId::new("limit", name),
            &physical,
            |b, physical| {
                b.iter(|| limiter.limit_brightness_for_frame(black_box(physical.as_bytes()), 255));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, map_frame_throughput, power_limit_check);
criterion_main!(benches);
