//! Per-period cost of the state machine
//!
//! Every call must fit comfortably inside one audio period (5.3ms for 256
//! frames at 48kHz).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use latencytester_core::audio::amplitude::average_amplitude;
use latencytester_core::audio::tone::SineGenerator;
use latencytester_core::latency::{LatencyConfig, LatencyState, LatencyTest};

fn ambient(period: usize) -> Vec<i16> {
    (0..period)
        .map(|i| if i % 2 == 0 { 100 } else { -100 })
        .collect()
}

fn listening_test(config: &LatencyConfig) -> LatencyTest {
    let mut test = LatencyTest::new(config.clone()).unwrap();
    let block = ambient(config.period_size);
    while test.state() != LatencyState::PlayAndListen {
        test.handle_input(&block).unwrap();
    }
    test
}

fn bench_average_amplitude(c: &mut Criterion) {
    let block = ambient(256);
    c.bench_function("average_amplitude_256", |b| {
        b.iter(|| average_amplitude(black_box(&block)))
    });
}

fn bench_listening_period(c: &mut Criterion) {
    let config = LatencyConfig::default();
    let block = ambient(config.period_size);
    let template = listening_test(&config);

    c.bench_function("handle_input_listening_256", |b| {
        b.iter_batched(
            || template.clone(),
            |mut test| test.handle_input(black_box(&block)).unwrap(),
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_output_period(c: &mut Criterion) {
    let config = LatencyConfig {
        silence_guard_periods: 0,
        ..Default::default()
    };
    let mut test = listening_test(&config);
    let mut probe = SineGenerator::new(config.sample_rate, 997.0, 0.5);
    let mut block = vec![0i16; config.period_size];

    c.bench_function("handle_output_probe_256", |b| {
        b.iter(|| test.handle_output(black_box(&mut block), &mut probe))
    });
}

criterion_group!(
    benches,
    bench_average_amplitude,
    bench_listening_period,
    bench_output_period
);
criterion_main!(benches);
