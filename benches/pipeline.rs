//! Benchmarks for indicator derivation, detection and the batch run.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reclaim::prelude::*;

/// Generate deterministic pseudo-random daily bars
fn generate_bars(n: usize, seed: usize) -> Vec<PricePoint> {
  let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
  let mut bars = Vec::with_capacity(n);
  let mut price = 100.0;

  for i in 0..n {
    let change = (((i + seed) * 7 + 13) % 100) as f64 / 50.0 - 1.0; // Deterministic "random"
    let volatility = 0.5 + (((i + seed) * 3) % 10) as f64 / 10.0;

    let o = price;
    let c = (price + change * 0.5).max(5.0);
    let h = o.max(c) + volatility * 0.5;
    let l = (o.min(c) - volatility * 0.5).max(1.0);

    let date = start + chrono::Days::new(i as u64);
    bars.push(PricePoint::new(date, o, h, l, c, 1_000_000.0));
    price = c;
  }

  bars
}

fn generate_universe(symbols: usize, bars: usize) -> Vec<PriceSeries> {
  (0..symbols)
    .map(|s| PriceSeries::new(format!("{:04}", 1000 + s), generate_bars(bars, s * 17)))
    .collect()
}

fn bench_compute_frame(c: &mut Criterion) {
  let bars = generate_bars(1000, 0);
  let config = ScanConfig::default();

  c.bench_function("compute_frame_1000_bars", |b| {
    b.iter(|| {
      let _ = black_box(compute_frame(black_box(&bars), &config));
    })
  });
}

fn bench_detect(c: &mut Criterion) {
  let bars = generate_bars(1000, 0);
  let detector = BreakdownReclaimDetector::default();

  c.bench_function("detect_1000_bars", |b| {
    b.iter(|| {
      let _ = black_box(detector.scan("BENCH", black_box(&bars)));
    })
  });
}

fn bench_screen(c: &mut Criterion) {
  let bars = generate_bars(250, 0);
  let selector = MomentumSlopeSelector::default();

  c.bench_function("screen_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(selector.screen("BENCH", black_box(&bars)));
    })
  });
}

fn bench_batch_sizes(c: &mut Criterion) {
  let mut group = c.benchmark_group("batch_run");
  let engine = EngineBuilder::new().build().unwrap();

  for symbols in [10, 100, 500] {
    let universe = generate_universe(symbols, 250);

    group.bench_with_input(BenchmarkId::from_parameter(symbols), &universe, |b, universe| {
      b.iter(|| {
        let _ = black_box(engine.run(black_box(universe), &CancelToken::new()));
      })
    });
  }

  group.finish();
}

criterion_group!(benches, bench_compute_frame, bench_detect, bench_screen, bench_batch_sizes);
criterion_main!(benches);
