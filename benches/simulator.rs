//! Criterion benchmarks for the simulation loop.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tvb::prelude::*;

/// Sparse random network: each region receives from `fan_in` others.
fn make_connectivity(n: usize, fan_in: usize, seed: u64) -> Connectivity {
    let mut rng = tvb::prng::Prng::new(seed);
    let mut weights = vec![0.0; n * n];
    let mut tracts = vec![0.0; n * n];
    for k in 0..n {
        for _ in 0..fan_in {
            let j = (rng.next_f64() * n as f64) as usize % n;
            if j == k {
                continue;
            }
            weights[k * n + j] = rng.gen_range_f64(0.1, 1.0);
            tracts[k * n + j] = rng.gen_range_f64(5.0, 120.0);
        }
    }
    Connectivity::new(weights, tracts).expect("square matrices")
}

fn make_sim(n: usize, tier: ExecutionTier) -> Simulator {
    let fan_in = (n as f64).sqrt() as usize;
    let mut sim = Simulator::new(
        Generic2dOscillator::default(),
        make_connectivity(n, fan_in, 42),
        coupling::Linear { a: 0.0152, b: 0.0 },
        HeunStochastic::new(0.1, Noise::additive(1e-4)),
    )
    .with_execution_tier(tier)
    .with_monitor(TemporalAverage::new(1.0));
    sim.configure().expect("valid configuration");
    sim
}

/// Benchmark step() with varying network sizes.
fn bench_step_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_size");

    for size in [16, 68, 192, 512].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("scalar", size), size, |b, &size| {
            let mut sim = make_sim(size, ExecutionTier::Scalar);
            b.iter(|| black_box(sim.step().expect("stable")));
        });
    }

    group.finish();
}

/// Benchmark step() comparing execution tiers at a fixed size.
fn bench_step_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_tier");

    let size = 512;
    group.throughput(Throughput::Elements(size as u64));

    group.bench_function("scalar_512", |b| {
        let mut sim = make_sim(size, ExecutionTier::Scalar);
        b.iter(|| black_box(sim.step().expect("stable")));
    });

    // Falls back to scalar if the feature is not enabled.
    group.bench_function("parallel_512", |b| {
        let mut sim = make_sim(size, ExecutionTier::Parallel);
        b.iter(|| black_box(sim.step().expect("stable")));
    });

    group.finish();
}

/// Benchmark checkpoint save/load.
fn bench_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint");

    for size in [68, 512].iter() {
        let mut sim = make_sim(*size, ExecutionTier::Scalar);
        for _ in 0..100 {
            sim.step().expect("stable");
        }
        let ckpt = sim.checkpoint().expect("configured");
        let image = ckpt.save_bytes().expect("in-memory write");
        group.throughput(Throughput::Bytes(image.len() as u64));

        group.bench_with_input(BenchmarkId::new("save", size), &ckpt, |b, ckpt| {
            b.iter(|| {
                let mut buf = Vec::with_capacity(image.len());
                ckpt.save_to(&mut buf).expect("in-memory write");
                black_box(buf.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("load", size), &image, |b, image| {
            b.iter(|| {
                let loaded = Checkpoint::load_bytes(image).expect("valid image");
                black_box(loaded.current_step)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_step_sizes, bench_step_tiers, bench_checkpoint);
criterion_main!(benches);
